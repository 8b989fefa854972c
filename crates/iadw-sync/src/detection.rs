//! One detection pass against the catalog store.

use iadw_core::{build_report, detect, CandidateList, ChangeReport, DetectionResult, KnownCatalog};
use iadw_storage::{CatalogError, CatalogStore};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DetectionError {
    /// The known set could not be read or was inconsistent; no report is produced.
    #[error("catalog unavailable")]
    CatalogUnavailable(#[from] CatalogError),
}

pub async fn known_catalog(catalog: &dyn CatalogStore) -> Result<KnownCatalog, DetectionError> {
    let records = catalog.query_known_records().await?;
    let known = KnownCatalog::from_records(&records).map_err(CatalogError::from)?;
    Ok(known)
}

pub async fn detect_changes(
    catalog: &dyn CatalogStore,
    candidate_urls: &[String],
) -> Result<DetectionResult, DetectionError> {
    let candidates = CandidateList::from_urls(candidate_urls);
    for malformed in candidates.malformed() {
        warn!(url = malformed.url(), error = %malformed, "skipping malformed source url");
    }

    let known = known_catalog(catalog).await?;
    let result = detect(&candidates, &known);
    info!(
        candidates = candidate_urls.len(),
        known = known.len(),
        new_files = result.new_files.len(),
        new_city_files = result.new_city_files.len(),
        unchanged = result.unchanged.len(),
        skipped_malformed = result.skipped_malformed,
        "detection pass complete"
    );
    Ok(result)
}

/// Empty report when nothing is new; never persists anything.
pub async fn run_detection(
    catalog: &dyn CatalogStore,
    candidate_urls: &[String],
) -> Result<ChangeReport, DetectionError> {
    let result = detect_changes(catalog, candidate_urls).await?;
    Ok(build_report(&result))
}
