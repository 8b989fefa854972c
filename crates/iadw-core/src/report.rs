//! Structured change report built from a detection pass.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::detect::DetectionResult;
use crate::record::SourceRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityFileCount {
    pub country: String,
    pub city: String,
    pub files_added: usize,
}

/// What changed since the last ingestion. Not pre-rendered; notifiers decide presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub file_counts: Vec<CityFileCount>,
    pub new_files: Vec<SourceRecord>,
    /// `None` when no new city appeared; never `Some(vec![])`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cities: Option<Vec<String>>,
    pub skipped_malformed: usize,
}

impl ChangeReport {
    pub fn should_notify(&self) -> bool {
        !self.new_files.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.new_cities.is_none()
    }
}

pub fn build_report(detection: &DetectionResult) -> ChangeReport {
    let mut groups: BTreeMap<(String, String, &str, &str), usize> = BTreeMap::new();
    for record in &detection.new_files {
        let key = (
            record.country.to_lowercase(),
            record.city.to_lowercase(),
            record.country.as_str(),
            record.city.as_str(),
        );
        *groups.entry(key).or_default() += 1;
    }
    let file_counts = groups
        .into_iter()
        .map(|((_, _, country, city), files_added)| CityFileCount {
            country: country.to_string(),
            city: city.to_string(),
            files_added,
        })
        .collect();

    let new_cities = if detection.new_city_files.is_empty() {
        None
    } else {
        let mut seen = HashSet::new();
        Some(
            detection
                .new_city_files
                .iter()
                .filter(|record| seen.insert(record.city.as_str()))
                .map(|record| record.city.clone())
                .collect(),
        )
    };

    ChangeReport {
        file_counts,
        new_files: detection.new_files.clone(),
        new_cities,
        skipped_malformed: detection.skipped_malformed,
    }
}
