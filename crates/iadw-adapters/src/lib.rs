//! Listing page source: fetch the data page and read its headings, tables and file links.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iadw_core::CityIndexEntry;
use iadw_storage::CachedFetcher;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "iadw-adapters";

pub const DEFAULT_PAGE_URL: &str = "http://insideairbnb.com/get-the-data.html";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("unexpected page layout: {0}")]
    Layout(String),
    #[error("no table found for city {0:?}")]
    CityNotFound(String),
    #[error("fetching listing page: {0:#}")]
    Fetch(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    fn page_url(&self) -> &str;

    async fn fetch_catalog_page(&self) -> Result<FetchedPage, AdapterError>;
}

/// Live page behind the on-disk response cache.
#[derive(Debug, Clone)]
pub struct HttpListingSource {
    page_url: String,
    fetcher: CachedFetcher,
}

impl HttpListingSource {
    pub fn new(page_url: impl Into<String>, fetcher: CachedFetcher) -> Self {
        Self {
            page_url: page_url.into(),
            fetcher,
        }
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    fn page_url(&self) -> &str {
        &self.page_url
    }

    async fn fetch_catalog_page(&self) -> Result<FetchedPage, AdapterError> {
        let page = self.fetcher.fetch(&self.page_url).await?;
        Ok(FetchedPage {
            url: page.url.clone(),
            body: page.text(),
            from_cache: page.from_cache,
            fetched_at: page.fetched_at,
        })
    }
}

/// Saved copy of the page on disk; always reported as a cache hit.
#[derive(Debug, Clone)]
pub struct FixtureListingSource {
    page_url: String,
    path: PathBuf,
}

impl FixtureListingSource {
    pub fn new(page_url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            page_url: page_url.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ListingSource for FixtureListingSource {
    fn page_url(&self) -> &str {
        &self.page_url
    }

    async fn fetch_catalog_page(&self) -> Result<FetchedPage, AdapterError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(FetchedPage {
            url: self.page_url.clone(),
            body,
            from_cache: true,
            fetched_at: Utc::now(),
        })
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every `<h2>city, region, country</h2>` heading, sorted by country (page order within a country).
pub fn parse_index(document: &str) -> Result<Vec<CityIndexEntry>, AdapterError> {
    let document = Html::parse_document(document);
    let headings = selector("h2")?;

    let mut index = Vec::new();
    for heading in document.select(&headings) {
        let text = element_text(heading);
        let parts: Vec<&str> = text.rsplitn(3, ',').map(str::trim).collect();
        match parts.as_slice() {
            [country, region, city] => index.push(CityIndexEntry {
                city: city.to_string(),
                region: region.to_string(),
                country: country.to_string(),
            }),
            [country, city] => index.push(CityIndexEntry {
                city: city.to_string(),
                region: String::new(),
                country: country.to_string(),
            }),
            _ => warn!(heading = %text, "skipping heading without a country"),
        }
    }

    index.sort_by_key(|entry| entry.country.to_lowercase());
    Ok(index)
}

/// Lowercase, hyphenated city keys matched against the page's table classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityFilter {
    keys: Vec<String>,
}

fn city_key(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .map(|word| word.chars().filter(|c| c.is_alphanumeric() || *c == '-').collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

impl CityFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = Vec::new();
        for name in names {
            let key = city_key(name.as_ref());
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        Self { keys }
    }

    /// `"paris|geneva"` style pattern.
    pub fn parse(pattern: &str) -> Self {
        Self::new(pattern.split('|'))
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn pattern(&self) -> String {
        self.keys.join("|")
    }

    /// True when one of the class tokens equals a city key.
    pub fn matches_class(&self, class_attr: &str) -> bool {
        class_attr
            .split_whitespace()
            .map(str::to_lowercase)
            .any(|token| self.keys.iter().any(|key| *key == token))
    }
}

/// Cities whose country matches one of the `|`-separated names (case-insensitive substring).
/// No filter selects every city on the page.
pub fn list_cities(index: &[CityIndexEntry], country_filter: Option<&str>) -> CityFilter {
    let countries: Vec<String> = country_filter
        .map(|f| {
            f.split('|')
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();

    CityFilter::new(
        index
            .iter()
            .filter(|entry| {
                let country = entry.country.to_lowercase();
                countries.is_empty() || countries.iter().any(|c| country.contains(c.as_str()))
            })
            .map(|entry| entry.city.as_str()),
    )
}

/// Links whose `href` ends with `filename`, table by table in page order.
///
/// Without `include_history` only the first match per table is kept: the page lists the
/// newest snapshot first. Tables without a match are logged and skipped.
pub fn parse_source_links(
    document: &str,
    filename: &str,
    city_filter: Option<&CityFilter>,
    include_history: bool,
) -> Result<Vec<String>, AdapterError> {
    let document = Html::parse_document(document);
    let tables = selector("table")?;
    let anchors = selector("a[href]")?;

    let mut links = Vec::new();
    let mut table_count = 0usize;
    for table in document.select(&tables) {
        table_count += 1;
        let class = table.value().attr("class").unwrap_or_default();
        if let Some(filter) = city_filter {
            if !filter.matches_class(class) {
                continue;
            }
        }

        let mut matches = table
            .select(&anchors)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| href.ends_with(filename))
            .map(str::to_string)
            .peekable();

        if matches.peek().is_none() {
            warn!(table = class, filename, "table lists no matching file");
            continue;
        }
        if include_history {
            links.extend(matches);
        } else {
            links.extend(matches.next());
        }
    }

    if table_count == 0 {
        return Err(AdapterError::Layout("no <table> elements on page".to_string()));
    }
    Ok(links)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Whole file table of one city; cells holding a link yield the link target.
pub fn parse_city_table(document: &str, city: &str) -> Result<CityTable, AdapterError> {
    let document = Html::parse_document(document);
    let tables = selector("table")?;
    let th = selector("th")?;
    let tr = selector("tr")?;
    let td = selector("td")?;
    let anchors = selector("a[href]")?;
    let filter = CityFilter::new([city]);

    let table = document
        .select(&tables)
        .find(|t| filter.matches_class(t.value().attr("class").unwrap_or_default()))
        .ok_or_else(|| AdapterError::CityNotFound(city.to_string()))?;

    let headers = table.select(&th).map(element_text).collect();
    let rows = table
        .select(&tr)
        .map(|row| {
            row.select(&td)
                .map(|cell| match cell.select(&anchors).next() {
                    Some(a) => a.value().attr("href").unwrap_or_default().trim().to_string(),
                    None => element_text(cell),
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    Ok(CityTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <h2>Paris, Île-de-France, France</h2>
        <table class="table table-hover paris">
          <tr><th>Date Compiled</th><th>File Name</th></tr>
          <tr><td>16 February, 2020</td><td><a href="http://data.insideairbnb.com/france/ile-de-france/paris/2020-02-16/visualisations/listings.csv">listings.csv</a></td></tr>
          <tr><td>10 January, 2020</td><td><a href="http://data.insideairbnb.com/france/ile-de-france/paris/2020-01-10/visualisations/listings.csv">listings.csv</a></td></tr>
        </table>
        <h2>New York City, New York, United States</h2>
        <table class="table table-hover new-york-city">
          <tr><td>12 February, 2020</td><td><a href=" http://data.insideairbnb.com/united-states/ny/new-york-city/2020-02-12/visualisations/listings.csv ">listings.csv</a></td></tr>
        </table>
        <h2>Venice, Veneto, Italy</h2>
        <table class="table venice">
          <tr><td>20 January, 2020</td><td><a href="http://data.insideairbnb.com/italy/veneto/venice/2020-01-20/data/listings.csv.gz">listings.csv.gz</a></td></tr>
        </table>
    "#;

    #[test]
    fn index_splits_from_the_right_and_sorts_by_country() {
        let index = parse_index(
            "<h2>Washington, D.C., District of Columbia, United States</h2><h2>Paris, Île-de-France, France</h2><h2>Broken</h2>",
        )
        .unwrap();
        assert_eq!(
            index,
            vec![
                CityIndexEntry {
                    city: "Paris".into(),
                    region: "Île-de-France".into(),
                    country: "France".into(),
                },
                CityIndexEntry {
                    city: "Washington, D.C.".into(),
                    region: "District of Columbia".into(),
                    country: "United States".into(),
                },
            ]
        );
    }

    #[test]
    fn city_filter_matches_whole_class_tokens() {
        let filter = CityFilter::parse("Nice|New York City");
        assert_eq!(filter.pattern(), "nice|new-york-city");
        assert!(filter.matches_class("table table-hover NEW-YORK-CITY"));
        assert!(!filter.matches_class("table venice"));
        assert!(!CityFilter::default().matches_class("table paris"));
    }

    #[test]
    fn current_mode_takes_first_match_per_table() {
        let links = parse_source_links(PAGE, "listings.csv", None, false).unwrap();
        assert_eq!(
            links,
            vec![
                "http://data.insideairbnb.com/france/ile-de-france/paris/2020-02-16/visualisations/listings.csv",
                "http://data.insideairbnb.com/united-states/ny/new-york-city/2020-02-12/visualisations/listings.csv",
            ]
        );
    }

    #[test]
    fn history_mode_keeps_every_match_of_filtered_cities() {
        let filter = CityFilter::parse("paris");
        let links = parse_source_links(PAGE, "listings.csv", Some(&filter), true).unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.contains("/paris/")));
    }

    #[test]
    fn empty_filter_selects_nothing() {
        let links =
            parse_source_links(PAGE, "listings.csv", Some(&CityFilter::default()), true).unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn page_without_tables_is_a_layout_error() {
        let err = parse_source_links("<h2>Paris, IdF, France</h2>", "listings.csv", None, false)
            .unwrap_err();
        assert!(matches!(err, AdapterError::Layout(_)));
    }

    #[test]
    fn city_table_yields_link_targets_and_text() {
        let table = parse_city_table(PAGE, "Paris").unwrap();
        assert_eq!(table.headers, vec!["Date Compiled", "File Name"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][0], "10 January, 2020");
        assert!(table.rows[1][1].ends_with("2020-01-10/visualisations/listings.csv"));

        assert!(matches!(
            parse_city_table(PAGE, "Lisbon"),
            Err(AdapterError::CityNotFound(city)) if city == "Lisbon"
        ));
    }
}
