//! Source record model, catalog diff and change reporting for IADW.

pub mod detect;
pub mod geo;
pub mod record;
pub mod report;

pub use detect::{compare_records, detect, should_notify, DetectionResult, InconsistentCatalog, KnownCatalog};
pub use geo::haversine_km;
pub use record::{decompose, CandidateList, MalformedSourceUrl, SourceRecord};
pub use report::{build_report, ChangeReport, CityFileCount};

pub const CRATE_NAME: &str = "iadw-core";

/// One heading of the data listing page: `city, region, country`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CityIndexEntry {
    pub city: String,
    pub region: String,
    pub country: String,
}
