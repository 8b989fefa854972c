use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use iadw_adapters::{list_cities, parse_city_table, parse_index, DEFAULT_PAGE_URL};
use iadw_storage::tables::{read_table, within_radius};
use iadw_sync::{
    cached_fetcher, extract_links, fetch_page, report_recent_markdown, run_sync_once_from_env,
    SyncConfig, SyncPipeline, TargetConfig, TargetRegistry,
};
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "iadw")]
#[command(about = "Watch the InsideAirbnb data page for new files")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every enabled target once (the default).
    Sync,
    /// Report what a sync would pick up, without changing anything.
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Run syncs on the SYNC_CRON_1 / SYNC_CRON_2 schedules until interrupted.
    Schedule,
    /// List the cities on the data page.
    Cities {
        /// `|`-separated country names, e.g. "france|switzerland".
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        target: Option<String>,
    },
    /// List the file links a target would consider.
    Files {
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        filename: Option<String>,
        /// Every snapshot, not only the newest per city.
        #[arg(long)]
        history: bool,
        #[arg(long)]
        target: Option<String>,
    },
    /// Print one city's file table.
    Table {
        city: String,
        #[arg(long)]
        target: Option<String>,
    },
    /// Print the listings of a downloaded file within `--km` of a point, nearest first.
    Nearby {
        file: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value_t = 1.0)]
        km: f64,
    },
    /// Summarise recent runs from the reports directory.
    Report {
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
}

fn default_target() -> TargetConfig {
    TargetConfig {
        name: "default".to_string(),
        enabled: true,
        page_url: DEFAULT_PAGE_URL.to_string(),
        filename: "listings.csv".to_string(),
        countries: None,
        cities: None,
        include_history: false,
        table: "listings".to_string(),
        replace_existing: false,
        fixture: None,
    }
}

/// The named target, else the first enabled one, else the public page.
async fn page_target(config: &SyncConfig, name: Option<&str>) -> Result<TargetConfig> {
    match (TargetRegistry::load(&config.targets_path()).await, name) {
        (Ok(registry), Some(name)) => registry
            .get(name)
            .cloned()
            .with_context(|| format!("no target named {name:?}")),
        (Ok(registry), None) => Ok(registry
            .enabled()
            .next()
            .cloned()
            .unwrap_or_else(default_target)),
        (Err(err), None) => {
            warn!(error = %format!("{err:#}"), "no target registry; using the public page");
            Ok(default_target())
        }
        (Err(err), Some(_)) => Err(err),
    }
}

async fn page_for(config: &SyncConfig, target: &TargetConfig) -> Result<String> {
    let fetcher = cached_fetcher(config)?;
    Ok(fetch_page(config, &fetcher, target).await?.body)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} targets={} new_files={} failed={} reports={}",
                summary.run_id,
                summary.targets.len(),
                summary.new_files(),
                summary.failed_targets(),
                summary.reports_dir.display()
            );
            if summary.failed_targets() > 0 {
                bail!("{} target(s) failed", summary.failed_targets());
            }
        }
        Commands::Check { json } => {
            let pipeline = SyncPipeline::from_config(SyncConfig::from_env()).await?;
            let reports = pipeline.check_once().await?;
            pipeline.store().close().await;
            if json {
                let value: Vec<_> = reports
                    .iter()
                    .map(|(target, report)| serde_json::json!({ "target": target, "report": report }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                for (target, report) in &reports {
                    println!("{target}: {} new file(s)", report.new_files.len());
                    for count in &report.file_counts {
                        println!("  {} / {}: {}", count.country, count.city, count.files_added);
                    }
                    if let Some(cities) = &report.new_cities {
                        println!("  new cities: {}", cities.join(", "));
                    }
                    if report.skipped_malformed > 0 {
                        println!("  skipped malformed links: {}", report.skipped_malformed);
                    }
                }
            }
        }
        Commands::Schedule => {
            let mut config = SyncConfig::from_env();
            config.scheduler_enabled = true;
            let pipeline = Arc::new(SyncPipeline::from_config(config).await?);
            let Some(mut sched) = pipeline.build_scheduler().await? else {
                bail!("scheduler was not created");
            };
            sched.start().await.context("starting scheduler")?;
            println!(
                "scheduler running ({}, {}); press ctrl-c to stop",
                pipeline.config().sync_cron_1,
                pipeline.config().sync_cron_2
            );
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
            pipeline.store().close().await;
        }
        Commands::Cities { country, target } => {
            let config = SyncConfig::from_env();
            let target = page_target(&config, target.as_deref()).await?;
            let page = page_for(&config, &target).await?;
            let index = parse_index(&page)?;
            match country {
                Some(country) => {
                    for city in list_cities(&index, Some(&country)).keys() {
                        println!("{city}");
                    }
                }
                None => {
                    for entry in &index {
                        println!("{}, {}, {}", entry.city, entry.region, entry.country);
                    }
                }
            }
        }
        Commands::Files {
            city,
            country,
            filename,
            history,
            target,
        } => {
            let config = SyncConfig::from_env();
            let mut target = page_target(&config, target.as_deref()).await?;
            target.override_filters(city, country);
            if let Some(filename) = filename {
                target.filename = filename;
            }
            target.include_history |= history;

            let page = page_for(&config, &target).await?;
            for link in extract_links(&target, &page)? {
                println!("{link}");
            }
        }
        Commands::Table { city, target } => {
            let config = SyncConfig::from_env();
            let target = page_target(&config, target.as_deref()).await?;
            let page = page_for(&config, &target).await?;
            let table = parse_city_table(&page, &city)?;
            println!("{}", table.headers.join("\t"));
            for row in &table.rows {
                println!("{}", row.join("\t"));
            }
        }
        Commands::Nearby { file, lat, lon, km } => {
            let table = read_table(&file)?;
            let near = within_radius(&table, lat, lon, km)
                .with_context(|| format!("filtering {}", file.display()))?;
            println!("{}", near.headers.join("\t"));
            for row in &near.rows {
                println!("{}", row.join("\t"));
            }
        }
        Commands::Report { runs } => {
            let config = SyncConfig::from_env();
            println!("{}", report_recent_markdown(runs, &config.reports_root())?);
        }
    }

    Ok(())
}
