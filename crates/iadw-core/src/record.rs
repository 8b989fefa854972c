//! Source record model and positional URL decomposition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parts a source URL splits into when cut from the right:
/// source, country, region, city, last_update, source_folder, source_filename.
pub const SOURCE_URL_PARTS: usize = 7;

/// One remote file reference with the location/version metadata encoded in its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_url: String,
    pub country: String,
    pub region: String,
    pub city: String,
    /// Vintage marker copied verbatim from the path. Never parsed as a date.
    pub last_update: String,
}

impl SourceRecord {
    /// Last path segment of the source URL (`listings.csv`).
    pub fn file_name(&self) -> &str {
        self.source_url.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedSourceUrl {
    #[error("source url {url:?} has {found} path segments, expected at least 7")]
    TooFewSegments { url: String, found: usize },
    #[error("source url {url:?} has an empty {segment} segment")]
    EmptySegment { url: String, segment: &'static str },
}

impl MalformedSourceUrl {
    pub fn url(&self) -> &str {
        match self {
            Self::TooFewSegments { url, .. } | Self::EmptySegment { url, .. } => url,
        }
    }
}

/// Split `url` from the right into its fixed trailing segments.
///
/// `http://data.insideairbnb.com/france/ile-de-france/paris/2019-11-05/visualisations/listings.csv`
/// yields country `france`, region `ile-de-france`, city `paris`, last update `2019-11-05`.
pub fn decompose(url: &str) -> Result<SourceRecord, MalformedSourceUrl> {
    let url = url.trim();
    let parts: Vec<&str> = url.rsplitn(SOURCE_URL_PARTS, '/').collect();
    let &[source_filename, source_folder, last_update, city, region, country, source] =
        parts.as_slice()
    else {
        return Err(MalformedSourceUrl::TooFewSegments {
            url: url.to_string(),
            found: parts.len(),
        });
    };

    let named = [
        ("source", source),
        ("country", country),
        ("region", region),
        ("city", city),
        ("last_update", last_update),
        ("source_folder", source_folder),
        ("source_filename", source_filename),
    ];
    if let Some(&(segment, _)) = named.iter().find(|(_, value)| value.is_empty()) {
        return Err(MalformedSourceUrl::EmptySegment {
            url: url.to_string(),
            segment,
        });
    }

    Ok(SourceRecord {
        source_url: url.to_string(),
        country: country.to_string(),
        region: region.to_string(),
        city: city.to_string(),
        last_update: last_update.to_string(),
    })
}

/// Records scraped in the current run, plus the URLs that failed decomposition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList {
    records: Vec<SourceRecord>,
    malformed: Vec<MalformedSourceUrl>,
}

impl CandidateList {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records,
            malformed: Vec::new(),
        }
    }

    /// Decompose every URL in scrape order; malformed ones are set aside, not dropped.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for url in urls {
            match decompose(url.as_ref()) {
                Ok(record) => list.records.push(record),
                Err(err) => list.malformed.push(err),
            }
        }
        list
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn malformed(&self) -> &[MalformedSourceUrl] {
        &self.malformed
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.malformed.is_empty()
    }
}
