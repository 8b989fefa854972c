//! Sync orchestration: targets, detection runs, alerts, ingestion and scheduling.

pub mod config;
pub mod detection;
pub mod pipeline;
pub mod reports;

use anyhow::Result;

pub use config::{SyncConfig, TargetConfig, TargetRegistry, TARGETS_FILE};
pub use detection::{detect_changes, known_catalog, run_detection, DetectionError};
pub use pipeline::{
    cached_fetcher, extract_links, fetch_page, listing_source, SyncPipeline, SOURCE_COLUMN,
};
pub use reports::{report_recent_markdown, SyncRunSummary, TargetOutcome};

pub const CRATE_NAME: &str = "iadw-sync";

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let pipeline = SyncPipeline::from_config(SyncConfig::from_env()).await?;
    let summary = pipeline.run_once().await;
    pipeline.store().close().await;
    summary
}
