use std::path::PathBuf;

use iadw_adapters::{
    list_cities, parse_city_table, parse_index, parse_source_links, CityFilter,
    FixtureListingSource, ListingSource, DEFAULT_PAGE_URL,
};
use iadw_core::CandidateList;

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/insideairbnb/get-the-data.html")
}

async fn fixture_page() -> String {
    FixtureListingSource::new(DEFAULT_PAGE_URL, fixture_path())
        .fetch_catalog_page()
        .await
        .expect("fixture page")
        .body
}

#[tokio::test]
async fn fixture_source_reports_a_cached_page() {
    let page = FixtureListingSource::new(DEFAULT_PAGE_URL, fixture_path())
        .fetch_catalog_page()
        .await
        .unwrap();
    assert!(page.from_cache);
    assert_eq!(page.url, DEFAULT_PAGE_URL);
}

#[tokio::test]
async fn index_is_grouped_by_country() {
    let index = parse_index(&fixture_page().await).unwrap();
    let countries: Vec<&str> = index.iter().map(|e| e.country.as_str()).collect();
    assert_eq!(
        countries,
        vec![
            "Belgium",
            "France",
            "France",
            "France",
            "Switzerland",
            "Switzerland",
            "Switzerland",
            "The Netherlands",
        ]
    );
    assert_eq!(index[1].city, "Paris");
    assert_eq!(index[1].region, "Île-de-France");
}

#[tokio::test]
async fn countries_select_their_cities() {
    let index = parse_index(&fixture_page().await).unwrap();
    let cities = list_cities(&index, Some("France|switzerland"));
    assert_eq!(
        cities.keys(),
        &["paris", "bordeaux", "lyon", "geneva", "vaud", "zurich"]
    );
    assert_eq!(list_cities(&index, None).keys().len(), 8);
    assert!(list_cities(&index, Some("Portugal")).is_empty());
}

#[tokio::test]
async fn current_links_yield_latest_snapshot_per_city() {
    let page = fixture_page().await;
    let index = parse_index(&page).unwrap();
    let cities = list_cities(&index, Some("France|Switzerland"));

    let links = parse_source_links(&page, "listings.csv", Some(&cities), false).unwrap();
    // Lyon has no visualisations file; Zurich's link is relative.
    assert_eq!(links.len(), 5);
    assert_eq!(
        links[0],
        "http://data.insideairbnb.com/france/ile-de-france/paris/2020-02-16/visualisations/listings.csv"
    );

    let candidates = CandidateList::from_urls(&links);
    assert_eq!(candidates.records().len(), 4);
    assert_eq!(candidates.malformed().len(), 1);
    assert_eq!(candidates.malformed()[0].url(), "/zurich/listings.csv");
}

#[tokio::test]
async fn history_links_cover_every_snapshot() {
    let page = fixture_page().await;
    let all = parse_source_links(&page, "listings.csv", None, true).unwrap();
    assert_eq!(all.len(), 11);

    let paris = CityFilter::parse("Paris");
    let history = parse_source_links(&page, "listings.csv", Some(&paris), true).unwrap();
    let dates: Vec<&str> = history
        .iter()
        .map(|url| url.rsplit('/').nth(2).unwrap())
        .collect();
    assert_eq!(dates, vec!["2020-02-16", "2020-01-10", "2019-12-11"]);
}

#[tokio::test]
async fn city_table_lists_all_files() {
    let table = parse_city_table(&fixture_page().await, "Bordeaux").unwrap();
    assert_eq!(
        table.headers,
        vec!["Date Compiled", "Country/City", "File Name", "Description"]
    );
    assert!(table
        .rows
        .iter()
        .all(|row| row[2].starts_with("http://data.insideairbnb.com/france/nouvelle-aquitaine/bordeaux/")));
}
