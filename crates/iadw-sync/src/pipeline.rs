//! The sync run: page → links → detection → alert → ingest → catalog.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use iadw_adapters::{
    list_cities, parse_index, parse_source_links, CityFilter, FetchedPage, FixtureListingSource,
    HttpListingSource, ListingSource,
};
use iadw_core::{ChangeReport, SourceRecord};
use iadw_notify::{render_notification, EmailNotifier, LogNotifier, Notifier};
use iadw_storage::tables::{append_column, read_and_concat};
use iadw_storage::{
    CachedFetcher, CatalogStore, DatasetStore, HttpClientConfig, HttpFetcher, PageCache,
    SqliteStore,
};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{SyncConfig, TargetConfig, TargetRegistry};
use crate::detection::{run_detection, DetectionError};
use crate::reports::{
    run_dir, write_change_report, write_run_summary, SyncRunSummary, TargetOutcome,
};

/// Column added to every ingested row, holding the file's source url.
pub const SOURCE_COLUMN: &str = "source";

/// HTTP client behind the page cache, both configured from `config`.
pub fn cached_fetcher(config: &SyncConfig) -> Result<CachedFetcher> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })?;
    Ok(CachedFetcher::new(
        http,
        PageCache::new(config.cache_dir.clone(), config.cache_ttl),
    ))
}

/// The target's saved page when it names a fixture, the live page otherwise.
pub fn listing_source(
    config: &SyncConfig,
    fetcher: &CachedFetcher,
    target: &TargetConfig,
) -> Box<dyn ListingSource> {
    match &target.fixture {
        Some(path) => Box::new(FixtureListingSource::new(
            target.page_url.clone(),
            config.workspace_root.join(path),
        )),
        None => Box::new(HttpListingSource::new(
            target.page_url.clone(),
            fetcher.clone(),
        )),
    }
}

pub async fn fetch_page(
    config: &SyncConfig,
    fetcher: &CachedFetcher,
    target: &TargetConfig,
) -> Result<FetchedPage> {
    let page = listing_source(config, fetcher, target)
        .fetch_catalog_page()
        .await
        .with_context(|| format!("fetching page for target {}", target.name))?;
    Ok(page)
}

/// Source links on `page` for `target`, honouring its city or country filter.
pub fn extract_links(target: &TargetConfig, page: &str) -> Result<Vec<String>> {
    let filter = match (&target.cities, &target.countries) {
        (Some(cities), _) => Some(CityFilter::parse(cities)),
        (None, Some(countries)) => {
            let index = parse_index(page)?;
            Some(list_cities(&index, Some(countries)))
        }
        (None, None) => None,
    };
    if let Some(filter) = &filter {
        if filter.is_empty() {
            warn!(target_name = %target.name, "city filter matches no city on the page");
        }
    }
    let links = parse_source_links(
        page,
        &target.filename,
        filter.as_ref(),
        target.include_history,
    )?;
    Ok(links)
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: SqliteStore,
    /// Replaces the per-table SQLite catalogs for every target when set.
    catalog: Option<Arc<dyn CatalogStore>>,
    notifier: Arc<dyn Notifier>,
    http: HttpFetcher,
    fetcher: CachedFetcher,
    datasets: DatasetStore,
    run_lock: Mutex<()>,
}

impl SyncPipeline {
    /// The SQLite store receives the dataset tables and, unless replaced with
    /// [`SyncPipeline::with_catalog`], keeps one catalog per target table.
    pub fn new(
        config: SyncConfig,
        store: SqliteStore,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let fetcher = cached_fetcher(&config)?;
        let http = fetcher.http().clone();
        let datasets = DatasetStore::new(config.data_dir.clone());
        Ok(Self {
            catalog: None,
            config,
            store,
            notifier,
            http,
            fetcher,
            datasets,
            run_lock: Mutex::new(()),
        })
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogStore>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Catalog of the files already loaded into `target.table`.
    pub fn catalog_for(&self, target: &TargetConfig) -> Result<Arc<dyn CatalogStore>> {
        if let Some(catalog) = &self.catalog {
            return Ok(Arc::clone(catalog));
        }
        let catalog = self
            .store
            .catalog(&target.table)
            .with_context(|| format!("opening catalog for table {}", target.table))?;
        Ok(Arc::new(catalog))
    }

    /// Connect the database named in `config` and pick the email or log channel.
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let store = SqliteStore::connect(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?;
        let notifier: Arc<dyn Notifier> = match &config.email {
            Some(email) => Arc::new(EmailNotifier::from_config(email)?),
            None => {
                info!("ALERT_TO not set; alerts go to the log");
                Arc::new(LogNotifier)
            }
        };
        Self::new(config, store, notifier)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub async fn load_targets(&self) -> Result<TargetRegistry> {
        TargetRegistry::load(&self.config.targets_path()).await
    }

    pub async fn fetch_page(&self, target: &TargetConfig) -> Result<FetchedPage> {
        fetch_page(&self.config, &self.fetcher, target).await
    }

    /// Run every enabled target once. Holds the run lock throughout, so
    /// overlapping calls queue instead of interleaving.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let _guard = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        self.run_locked(run_id).instrument(span).await
    }

    async fn run_locked(&self, run_id: Uuid) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let registry = self.load_targets().await?;
        let reports_dir = run_dir(&self.config.reports_root(), run_id);

        let mut targets = Vec::new();
        for target in registry.enabled() {
            let span = info_span!("sync_target", target_name = %target.name);
            let mut outcome = TargetOutcome::new(&target.name, &target.page_url);
            match self
                .sync_target(target, &reports_dir, &mut outcome)
                .instrument(span)
                .await
            {
                Ok(()) => {}
                Err(err) if err.downcast_ref::<DetectionError>().is_some() => {
                    error!(
                        target_name = %target.name,
                        error = %format!("{err:#}"),
                        "catalog unavailable; aborting run"
                    );
                    return Err(err);
                }
                Err(err) => {
                    error!(target_name = %target.name, error = %format!("{err:#}"), "target failed");
                    outcome.error = Some(format!("{err:#}"));
                }
            }
            targets.push(outcome);
        }

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            targets,
            reports_dir,
        };
        write_run_summary(&summary).await?;
        info!(
            targets = summary.targets.len(),
            new_files = summary.new_files(),
            failed = summary.failed_targets(),
            "sync run complete"
        );
        Ok(summary)
    }

    /// Detection only: nothing is written, sent or persisted.
    pub async fn check_target(&self, target: &TargetConfig) -> Result<ChangeReport> {
        let page = self.fetch_page(target).await?;
        let links = extract_links(target, &page.body)?;
        let catalog = self.catalog_for(target)?;
        Ok(run_detection(catalog.as_ref(), &links).await?)
    }

    pub async fn check_once(&self) -> Result<Vec<(String, ChangeReport)>> {
        let registry = self.load_targets().await?;
        let mut reports = Vec::new();
        for target in registry.enabled() {
            let report = self.check_target(target).await?;
            reports.push((target.name.clone(), report));
        }
        Ok(reports)
    }

    /// Fills `outcome` step by step, so a failure keeps what was done before it.
    async fn sync_target(
        &self,
        target: &TargetConfig,
        reports_dir: &Path,
        outcome: &mut TargetOutcome,
    ) -> Result<()> {
        let page = self.fetch_page(target).await?;
        outcome.from_cache = page.from_cache;
        let links = extract_links(target, &page.body)?;
        outcome.candidates = links.len();

        let catalog = self.catalog_for(target)?;
        let report = run_detection(catalog.as_ref(), &links).await?;
        outcome.new_files = report.new_files.len();
        outcome.new_cities = report.new_cities.clone().unwrap_or_default();
        outcome.skipped_malformed = report.skipped_malformed;
        write_change_report(reports_dir, &target.name, &report).await?;

        if !report.should_notify() {
            info!("no new files");
            return Ok(());
        }

        let notification = render_notification(&report, &target.page_url)?;
        self.notifier
            .send(&notification)
            .await
            .with_context(|| format!("sending alert via {}", self.notifier.channel_name()))?;
        outcome.notified = true;

        self.ingest(target, &report.new_files, outcome).await?;

        outcome.persisted = catalog
            .persist_records(&report.new_files)
            .await
            .context("persisting new source records")?;
        info!(
            new_files = outcome.new_files,
            persisted = outcome.persisted,
            rows = outcome.rows_loaded,
            "target synced"
        );
        Ok(())
    }

    /// Download, tag with [`SOURCE_COLUMN`], concatenate and load into the target table.
    async fn ingest(
        &self,
        target: &TargetConfig,
        records: &[SourceRecord],
        outcome: &mut TargetOutcome,
    ) -> Result<()> {
        let mut paths: Vec<PathBuf> = Vec::with_capacity(records.len());
        for record in records {
            let stored = self
                .datasets
                .download(&self.http, record, target.replace_existing)
                .await?;
            if stored.downloaded {
                outcome.downloaded += 1;
            }
            append_column(&stored.path, SOURCE_COLUMN, &record.source_url)?;
            paths.push(stored.path);
        }

        let table = read_and_concat(&paths)?;
        outcome.rows_loaded = self
            .store
            .load_table(&target.table, &table)
            .await
            .with_context(|| format!("loading table {}", target.table))?;
        Ok(())
    }

    /// Cron jobs calling [`SyncPipeline::run_once`]; `None` when scheduling is disabled.
    pub async fn build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for cron in [&self.config.sync_cron_1, &self.config.sync_cron_2] {
            let pipeline = Arc::clone(self);
            let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
                let pipeline = Arc::clone(&pipeline);
                Box::pin(async move {
                    match pipeline.run_once().await {
                        Ok(summary) => info!(
                            run_id = %summary.run_id,
                            new_files = summary.new_files(),
                            "scheduled sync finished"
                        ),
                        Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }
}
