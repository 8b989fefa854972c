//! Environment configuration and the `targets.yaml` registry.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use iadw_adapters::DEFAULT_PAGE_URL;
use iadw_notify::EmailConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;

pub const TARGETS_FILE: &str = "targets.yaml";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// `None` keeps cached pages until they are deleted by hand.
    pub cache_ttl: Option<Duration>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    /// Set when `ALERT_TO` names at least one recipient; otherwise alerts go to the log.
    pub email: Option<EmailConfig>,
    pub workspace_root: PathBuf,
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let workspace_root = var("IADW_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let recipients: Vec<String> = var("ALERT_TO")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .collect();
        let email = if recipients.is_empty() {
            None
        } else {
            let defaults = EmailConfig::default();
            let smtp_port = var("SMTP_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.smtp_port);
            let username = var("SMTP_USERNAME");
            Some(EmailConfig {
                smtp_host: var("SMTP_HOST").unwrap_or(defaults.smtp_host),
                smtp_port,
                tls: var("SMTP_TLS").map(|v| flag(Some(v))).unwrap_or(true),
                from: var("ALERT_FROM")
                    .or_else(|| username.clone())
                    .unwrap_or_default(),
                to: recipients,
                username,
                password: var("SMTP_PASSWORD"),
            })
        };

        Self {
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://insideairbnb.db".to_string()),
            data_dir: var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root.join("data")),
            cache_dir: var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root.join("cache")),
            cache_ttl: var("IADW_CACHE_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            user_agent: var("IADW_USER_AGENT").unwrap_or_else(|| "iadw-bot/0.1".to_string()),
            http_timeout_secs: var("IADW_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            scheduler_enabled: flag(var("IADW_SCHEDULER_ENABLED")),
            sync_cron_1: var("SYNC_CRON_1").unwrap_or_else(|| "0 0 6 * * *".to_string()),
            sync_cron_2: var("SYNC_CRON_2").unwrap_or_else(|| "0 0 18 * * *".to_string()),
            email,
            workspace_root,
        }
    }

    pub fn targets_path(&self) -> PathBuf {
        self.workspace_root.join(TARGETS_FILE)
    }

    pub fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetRegistry {
    pub targets: Vec<TargetConfig>,
}

fn default_true() -> bool {
    true
}

fn default_page_url() -> String {
    DEFAULT_PAGE_URL.to_string()
}

/// One configured scrape: which file, from which countries, into which table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_page_url")]
    pub page_url: String,
    /// Links are matched on this suffix, e.g. `listings.csv`.
    pub filename: String,
    /// `|`-separated country names; all countries when absent.
    #[serde(default)]
    pub countries: Option<String>,
    /// `|`-separated city names; overrides `countries` when present.
    #[serde(default)]
    pub cities: Option<String>,
    #[serde(default)]
    pub include_history: bool,
    pub table: String,
    #[serde(default)]
    pub replace_existing: bool,
    /// Saved copy of the page, relative to the workspace, read instead of the live site.
    #[serde(default)]
    pub fixture: Option<PathBuf>,
}

impl TargetConfig {
    /// Apply command-line filters. A country given without a city replaces the
    /// target's city list, since `cities` would otherwise take precedence.
    pub fn override_filters(&mut self, cities: Option<String>, countries: Option<String>) {
        match (cities, countries) {
            (Some(cities), countries) => {
                self.cities = Some(cities);
                if countries.is_some() {
                    self.countries = countries;
                }
            }
            (None, Some(countries)) => {
                self.cities = None;
                self.countries = Some(countries);
            }
            (None, None) => {}
        }
    }
}

impl TargetRegistry {
    pub fn parse(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text).context("parsing target registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("loading {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for target in &self.targets {
            let simple = |s: &str| {
                !s.is_empty()
                    && s
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            };
            if !simple(&target.name) {
                bail!("target name {:?} must be alphanumeric, '-' or '_'", target.name);
            }
            if !names.insert(target.name.as_str()) {
                bail!("duplicate target name {:?}", target.name);
            }
            if target.filename.trim().is_empty() {
                bail!("target {:?} has an empty filename", target.name);
            }
            if !simple(&target.table) || target.table.contains('-') {
                bail!("target {:?} has invalid table name {:?}", target.name, target.table);
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter().filter(|t| t.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = SyncConfig::from_lookup(lookup(&[]));
        assert_eq!(config.database_url, "sqlite://insideairbnb.db");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.cache_ttl, None);
        assert_eq!(config.sync_cron_1, "0 0 6 * * *");
        assert!(!config.scheduler_enabled);
        assert!(config.email.is_none());
        assert_eq!(config.targets_path(), PathBuf::from("./targets.yaml"));
    }

    #[test]
    fn alert_recipients_enable_email() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("ALERT_TO", "a@example.com, b@example.com"),
            ("SMTP_USERNAME", "bot@example.com"),
            ("SMTP_PASSWORD", "secret"),
            ("SMTP_PORT", "587"),
            ("IADW_SCHEDULER_ENABLED", "1"),
            ("IADW_CACHE_TTL_SECS", "3600"),
        ]));
        let email = config.email.expect("email config");
        assert_eq!(email.to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(email.from, "bot@example.com");
        assert_eq!(email.smtp_port, 587);
        assert_eq!(email.smtp_host, "smtp.gmail.com");
        assert_eq!(email.password.as_deref(), Some("secret"));
        assert!(config.scheduler_enabled);
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn registry_applies_defaults() {
        let registry = TargetRegistry::parse(
            "targets:\n  - name: summary\n    filename: listings.csv\n    countries: france|switzerland\n    table: listings\n  - name: off\n    enabled: false\n    filename: calendar.csv.gz\n    table: calendar\n",
        )
        .unwrap();
        let summary = registry.get("summary").unwrap();
        assert!(summary.enabled);
        assert_eq!(summary.page_url, DEFAULT_PAGE_URL);
        assert!(!summary.include_history);
        assert_eq!(registry.enabled().count(), 1);
    }

    #[test]
    fn registry_rejects_bad_names() {
        for yaml in [
            "targets:\n  - {name: a, filename: x.csv, table: t}\n  - {name: a, filename: y.csv, table: u}\n",
            "targets:\n  - {name: '../a', filename: x.csv, table: t}\n",
            "targets:\n  - {name: a, filename: x.csv, table: 'drop table'}\n",
            "targets:\n  - {name: a, filename: ' ', table: t}\n",
        ] {
            assert!(TargetRegistry::parse(yaml).is_err(), "accepted: {yaml}");
        }
    }

    #[test]
    fn country_override_clears_configured_cities() {
        let registry = TargetRegistry::parse(
            "targets:\n  - {name: history, filename: listings.csv, cities: Paris|Geneva, table: h}\n",
        )
        .unwrap();
        let mut target = registry.get("history").unwrap().clone();

        target.override_filters(None, Some("Switzerland".into()));
        assert_eq!(target.cities, None);
        assert_eq!(target.countries.as_deref(), Some("Switzerland"));

        target.override_filters(Some("Vaud".into()), None);
        assert_eq!(target.cities.as_deref(), Some("Vaud"));
        assert_eq!(target.countries.as_deref(), Some("Switzerland"));

        let before = target.clone();
        target.override_filters(None, None);
        assert_eq!(target, before);
    }

    #[tokio::test]
    async fn workspace_registry_is_valid() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../targets.yaml");
        let registry = TargetRegistry::load(&path).await.unwrap();
        let enabled: Vec<&str> = registry.enabled().map(|t| t.name.as_str()).collect();
        assert_eq!(enabled, vec!["listings-summary"]);
        assert!(registry.get("offline-sample").unwrap().fixture.is_some());
    }
}
