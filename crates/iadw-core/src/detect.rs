//! Catalog diff: partition a candidate list against the known catalog in one pass.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{CandidateList, SourceRecord};

/// Read-only snapshot of the catalog store taken for one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownCatalog {
    urls: HashSet<String>,
    cities: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("catalog lists source url {source_url:?} more than once")]
pub struct InconsistentCatalog {
    pub source_url: String,
}

impl KnownCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the snapshot, rejecting a store response that repeats a `source_url`.
    pub fn from_records<'a, I>(records: I) -> Result<Self, InconsistentCatalog>
    where
        I: IntoIterator<Item = &'a SourceRecord>,
    {
        let mut catalog = Self::default();
        for record in records {
            if !catalog.urls.insert(record.source_url.clone()) {
                return Err(InconsistentCatalog {
                    source_url: record.source_url.clone(),
                });
            }
            catalog.cities.insert(record.city.clone());
        }
        Ok(catalog)
    }

    pub fn contains_url(&self, source_url: &str) -> bool {
        self.urls.contains(source_url)
    }

    /// City membership ignores country: the same name under another country counts as known.
    pub fn contains_city(&self, city: &str) -> bool {
        self.cities.contains(city)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Outcome of one detection pass. Every partition is in [`compare_records`] order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub new_files: Vec<SourceRecord>,
    pub new_city_files: Vec<SourceRecord>,
    pub existing_city_new_files: Vec<SourceRecord>,
    pub unchanged: Vec<SourceRecord>,
    pub skipped_malformed: usize,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.unchanged.is_empty()
    }
}

fn cmp_case_insensitive(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// `(country, city)` ascending without regard to case, then `source_url`.
pub fn compare_records(a: &SourceRecord, b: &SourceRecord) -> Ordering {
    cmp_case_insensitive(&a.country, &b.country)
        .then_with(|| cmp_case_insensitive(&a.city, &b.city))
        .then_with(|| a.source_url.cmp(&b.source_url))
}

pub fn detect(candidates: &CandidateList, known: &KnownCatalog) -> DetectionResult {
    let mut seen = HashSet::new();
    let mut unique: Vec<&SourceRecord> = candidates
        .records()
        .iter()
        .filter(|record| seen.insert(record.source_url.as_str()))
        .collect();
    unique.sort_by(|a, b| compare_records(a, b));

    let mut result = DetectionResult {
        skipped_malformed: candidates.malformed().len(),
        ..DetectionResult::default()
    };

    for record in unique {
        if known.contains_url(&record.source_url) {
            result.unchanged.push(record.clone());
            continue;
        }
        if known.contains_city(&record.city) {
            result.existing_city_new_files.push(record.clone());
        } else {
            result.new_city_files.push(record.clone());
        }
        result.new_files.push(record.clone());
    }

    result
}

/// True iff the pass found at least one new file, of either category.
pub fn should_notify(detection: &DetectionResult) -> bool {
    !detection.new_files.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::decompose;

    const BASE: &str = "http://data.insideairbnb.com";

    fn url(country: &str, region: &str, city: &str, date: &str) -> String {
        format!("{BASE}/{country}/{region}/{city}/{date}/visualisations/listings.csv")
    }

    fn paris_2020_01() -> String {
        url("france", "ile-de-france", "paris", "2020-01-10")
    }

    fn geneva(date: &str) -> String {
        url("switzerland", "geneva", "geneva", date)
    }

    fn known(urls: &[String]) -> KnownCatalog {
        let records: Vec<SourceRecord> = urls.iter().map(|u| decompose(u).unwrap()).collect();
        KnownCatalog::from_records(&records).unwrap()
    }

    fn urls_of(records: &[SourceRecord]) -> Vec<&str> {
        records.iter().map(|r| r.source_url.as_str()).collect()
    }

    fn permutations(items: &[String]) -> Vec<Vec<String>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn new_city_is_flagged_when_unseen() {
        let known = known(&[paris_2020_01()]);
        let candidates = CandidateList::from_urls([paris_2020_01(), geneva("2020-02-27")]);

        let result = detect(&candidates, &known);

        assert_eq!(urls_of(&result.new_files), vec![geneva("2020-02-27")]);
        assert_eq!(urls_of(&result.new_city_files), vec![geneva("2020-02-27")]);
        assert!(result.existing_city_new_files.is_empty());
        assert_eq!(urls_of(&result.unchanged), vec![paris_2020_01()]);
        assert!(should_notify(&result));
    }

    #[test]
    fn new_snapshot_of_known_city_is_not_a_new_city() {
        let known = known(&[paris_2020_01(), geneva("2020-02-27")]);
        let candidates = CandidateList::from_urls([paris_2020_01(), geneva("2020-03-18")]);

        let result = detect(&candidates, &known);

        assert_eq!(urls_of(&result.new_files), vec![geneva("2020-03-18")]);
        assert!(result.new_city_files.is_empty());
        assert_eq!(urls_of(&result.existing_city_new_files), vec![geneva("2020-03-18")]);
        assert!(should_notify(&result));
    }

    #[test]
    fn city_known_under_another_country_is_not_new() {
        let known = known(&[url("united-states", "tx", "paris", "2019-06-01")]);
        let candidates = CandidateList::from_urls([paris_2020_01()]);

        let result = detect(&candidates, &known);

        assert_eq!(result.new_files.len(), 1);
        assert!(result.new_city_files.is_empty());
        assert_eq!(result.existing_city_new_files.len(), 1);
    }

    #[test]
    fn empty_candidates_yield_empty_result() {
        let result = detect(&CandidateList::default(), &known(&[paris_2020_01()]));
        assert_eq!(result, DetectionResult::default());
        assert!(result.is_empty());
        assert!(!should_notify(&result));
    }

    #[test]
    fn duplicate_candidates_appear_once() {
        let candidates = CandidateList::from_urls([
            geneva("2020-02-27"),
            paris_2020_01(),
            geneva("2020-02-27"),
            paris_2020_01(),
        ]);

        let result = detect(&candidates, &known(&[paris_2020_01()]));

        assert_eq!(urls_of(&result.new_files), vec![geneva("2020-02-27")]);
        assert_eq!(urls_of(&result.new_city_files), vec![geneva("2020-02-27")]);
        assert_eq!(urls_of(&result.unchanged), vec![paris_2020_01()]);
    }

    #[test]
    fn malformed_urls_are_counted_and_the_rest_processed() {
        let candidates = CandidateList::from_urls([
            "switzerland/geneva/listings.csv".to_string(),
            geneva("2020-02-27"),
        ]);

        let result = detect(&candidates, &KnownCatalog::empty());

        assert_eq!(result.skipped_malformed, 1);
        assert_eq!(urls_of(&result.new_files), vec![geneva("2020-02-27")]);
    }

    #[test]
    fn partitions_are_complete_and_disjoint() {
        let all = vec![
            paris_2020_01(),
            url("france", "ile-de-france", "paris", "2020-02-14"),
            geneva("2020-02-27"),
            url("switzerland", "vaud", "vaud", "2020-01-26"),
            url("belgium", "brussels", "brussels", "2020-01-20"),
            geneva("2020-02-27"),
        ];
        let known = known(&[paris_2020_01(), url("switzerland", "vaud", "vaud", "2020-01-26")]);

        let result = detect(&CandidateList::from_urls(&all), &known);

        let mut union: Vec<&str> = urls_of(&result.new_files);
        union.extend(urls_of(&result.unchanged));
        union.sort_unstable();
        let mut expected: Vec<&str> = all.iter().map(String::as_str).collect();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(union, expected);

        let new: HashSet<&str> = urls_of(&result.new_files).into_iter().collect();
        assert!(urls_of(&result.unchanged).iter().all(|u| !new.contains(u)));
        assert_eq!(
            result.new_city_files.len() + result.existing_city_new_files.len(),
            result.new_files.len()
        );
    }

    #[test]
    fn order_is_independent_of_scrape_order() {
        let items = vec![
            paris_2020_01(),
            url("France", "nouvelle-aquitaine", "Bordeaux", "2020-01-02"),
            geneva("2020-02-27"),
            url("belgium", "brussels", "brussels", "2020-01-20"),
        ];
        let known = known(&[paris_2020_01()]);
        let baseline = detect(&CandidateList::from_urls(&items), &known);

        assert_eq!(
            urls_of(&baseline.new_files),
            vec![
                url("belgium", "brussels", "brussels", "2020-01-20"),
                url("France", "nouvelle-aquitaine", "Bordeaux", "2020-01-02"),
                geneva("2020-02-27"),
            ]
        );
        for permutation in permutations(&items) {
            assert_eq!(detect(&CandidateList::from_urls(&permutation), &known), baseline);
        }
    }

    #[test]
    fn ties_on_location_fall_back_to_source_url() {
        let later = url("france", "ile-de-france", "paris", "2020-03-01");
        let earlier = url("france", "ile-de-france", "Paris", "2020-02-01");
        let result = detect(
            &CandidateList::from_urls([later.clone(), earlier.clone()]),
            &KnownCatalog::empty(),
        );
        let mut expected = vec![later, earlier];
        expected.sort();
        assert_eq!(urls_of(&result.new_files), expected);
    }

    #[test]
    fn repeated_url_in_store_response_is_inconsistent() {
        let record = decompose(&paris_2020_01()).unwrap();
        let err = KnownCatalog::from_records([&record, &record]).unwrap_err();
        assert_eq!(err.source_url, paris_2020_01());
    }
}
