//! Run report files under `reports/<run_id>/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use iadw_core::ChangeReport;
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

pub const CHANGE_REPORT_FILE: &str = "change_report.json";
pub const RUN_SUMMARY_FILE: &str = "run.json";
pub const SUMMARY_MARKDOWN_FILE: &str = "summary.md";

/// What happened to one target during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: String,
    pub page_url: String,
    pub from_cache: bool,
    pub candidates: usize,
    pub new_files: usize,
    pub new_cities: Vec<String>,
    pub skipped_malformed: usize,
    pub notified: bool,
    pub downloaded: usize,
    pub rows_loaded: u64,
    pub persisted: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetOutcome {
    /// Nothing done yet; the sync fills the counters as it goes.
    pub fn new(target: &str, page_url: &str) -> Self {
        Self {
            target: target.to_string(),
            page_url: page_url.to_string(),
            from_cache: false,
            candidates: 0,
            new_files: 0,
            new_cities: Vec::new(),
            skipped_malformed: 0,
            notified: false,
            downloaded: 0,
            rows_loaded: 0,
            persisted: 0,
            error: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<TargetOutcome>,
    pub reports_dir: PathBuf,
}

impl SyncRunSummary {
    pub fn new_files(&self) -> usize {
        self.targets.iter().map(|t| t.new_files).sum()
    }

    pub fn failed_targets(&self) -> usize {
        self.targets.iter().filter(|t| t.failed()).count()
    }
}

pub fn run_dir(reports_root: &Path, run_id: Uuid) -> PathBuf {
    reports_root.join(run_id.to_string())
}

/// `reports/<run_id>/<target>/change_report.json`
pub async fn write_change_report(
    run_dir: &Path,
    target: &str,
    report: &ChangeReport,
) -> Result<PathBuf> {
    let dir = run_dir.join(target);
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(CHANGE_REPORT_FILE);
    let bytes = serde_json::to_vec_pretty(report).context("serializing change report")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn summary_markdown(summary: &SyncRunSummary) -> String {
    let mut lines = vec![
        "# InsideAirbnb Sync Summary".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Targets: {}", summary.targets.len()),
        format!("- New files: {}", summary.new_files()),
        String::new(),
        "## Targets".to_string(),
    ];
    for outcome in &summary.targets {
        lines.push(format!(
            "- {}: {} candidates, {} new, {} downloaded, {} rows loaded{}{}",
            outcome.target,
            outcome.candidates,
            outcome.new_files,
            outcome.downloaded,
            outcome.rows_loaded,
            if outcome.notified { ", alert sent" } else { "" },
            match &outcome.error {
                Some(err) => format!(" (failed: {err})"),
                None => String::new(),
            }
        ));
        if !outcome.new_cities.is_empty() {
            lines.push(format!("  - new cities: {}", outcome.new_cities.join(", ")));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

pub async fn write_run_summary(summary: &SyncRunSummary) -> Result<()> {
    let dir = &summary.reports_dir;
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(dir.join(RUN_SUMMARY_FILE), json)
        .await
        .with_context(|| format!("writing {RUN_SUMMARY_FILE}"))?;
    fs::write(dir.join(SUMMARY_MARKDOWN_FILE), summary_markdown(summary))
        .await
        .with_context(|| format!("writing {SUMMARY_MARKDOWN_FILE}"))?;
    Ok(())
}

/// Markdown digest of the `runs` most recent run directories under `reports_root`.
pub fn report_recent_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut summaries = Vec::new();
    for entry in std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
    {
        let entry = entry.with_context(|| format!("listing {}", reports_root.display()))?;
        let path = entry.path().join(RUN_SUMMARY_FILE);
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let summary: SyncRunSummary = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        summaries.push(summary);
    }
    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    let mut lines = vec!["# InsideAirbnb Recent Runs".to_string(), String::new()];
    if summaries.is_empty() {
        lines.push("No runs recorded yet.".to_string());
    }
    for summary in summaries.iter().take(runs.max(1)) {
        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- started: {}", summary.started_at));
        lines.push(format!("- new files: {}", summary.new_files()));
        if summary.failed_targets() > 0 {
            lines.push(format!("- failed targets: {}", summary.failed_targets()));
        }
        for outcome in &summary.targets {
            lines.push(format!(
                "- `{}`: {} new ({} persisted){}",
                outcome.target,
                outcome.new_files,
                outcome.persisted,
                if outcome.notified { ", alert sent" } else { "" }
            ));
        }
        lines.push(format!("- directory: `{}`", summary.reports_dir.display()));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn outcome(target: &str, new_files: usize) -> TargetOutcome {
        TargetOutcome {
            target: target.to_string(),
            page_url: "http://insideairbnb.com/get-the-data.html".to_string(),
            from_cache: false,
            candidates: 4,
            new_files,
            new_cities: vec![],
            skipped_malformed: 0,
            notified: new_files > 0,
            downloaded: new_files,
            rows_loaded: 0,
            persisted: new_files,
            error: None,
        }
    }

    async fn write_run(root: &Path, hour: u32, new_files: usize) -> SyncRunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc.with_ymd_and_hms(2020, 3, 1, hour, 0, 0).unwrap();
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            targets: vec![outcome("summary", new_files)],
            reports_dir: run_dir(root, run_id),
        };
        write_run_summary(&summary).await.unwrap();
        summary
    }

    #[tokio::test]
    async fn recent_runs_are_listed_newest_first() {
        let dir = tempdir().expect("tempdir");
        let older = write_run(dir.path(), 6, 3).await;
        let newer = write_run(dir.path(), 18, 0).await;

        let md = report_recent_markdown(5, dir.path()).unwrap();
        let newer_at = md.find(&newer.run_id.to_string()).unwrap();
        let older_at = md.find(&older.run_id.to_string()).unwrap();
        assert!(newer_at < older_at);
        assert!(md.contains("- `summary`: 3 new (3 persisted), alert sent"));

        let only_one = report_recent_markdown(1, dir.path()).unwrap();
        assert!(!only_one.contains(&older.run_id.to_string()));
    }

    #[tokio::test]
    async fn change_report_is_written_per_target() {
        let dir = tempdir().expect("tempdir");
        let path = write_change_report(dir.path(), "summary", &ChangeReport::default())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("summary").join(CHANGE_REPORT_FILE));
        let back: ChangeReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn summary_markdown_mentions_failures() {
        let mut failed = outcome("calendar", 0);
        failed.error = Some("smtp down".into());
        let summary = SyncRunSummary {
            run_id: Uuid::nil(),
            started_at: Utc.with_ymd_and_hms(2020, 3, 1, 6, 0, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2020, 3, 1, 6, 1, 0).unwrap(),
            targets: vec![outcome("summary", 2), failed],
            reports_dir: PathBuf::from("reports/x"),
        };
        let md = summary_markdown(&summary);
        assert!(md.contains("- New files: 2"));
        assert!(md.contains("calendar: 4 candidates, 0 new, 0 downloaded, 0 rows loaded (failed: smtp down)"));
    }
}
