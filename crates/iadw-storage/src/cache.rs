//! On-disk response cache in front of [`HttpFetcher`].

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::info;

use crate::fetch::HttpFetcher;
use crate::{sha256_hex, write_atomic};

/// Cached response bodies keyed by the SHA-256 of the request URL.
#[derive(Debug, Clone)]
pub struct PageCache {
    root: PathBuf,
    ttl: Option<Duration>,
}

impl PageCache {
    /// `ttl = None` keeps entries forever.
    pub fn new(root: impl Into<PathBuf>, ttl: Option<Duration>) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root.join(format!("{}.body", sha256_hex(url.as_bytes())))
    }

    pub async fn lookup(&self, url: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(url);
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("checking cache entry {}", path.display()))
            }
        };

        if let Some(ttl) = self.ttl {
            let modified = metadata
                .modified()
                .with_context(|| format!("reading mtime of {}", path.display()))?;
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);
            if age > ttl {
                return Ok(None);
            }
        }

        let body = fs::read(&path)
            .await
            .with_context(|| format!("reading cache entry {}", path.display()))?;
        Ok(Some(body))
    }

    pub async fn store(&self, url: &str, body: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.path_for(url);
        write_atomic(&path, body).await?;
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub struct CachedPage {
    pub url: String,
    pub body: Vec<u8>,
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
}

impl CachedPage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct CachedFetcher {
    http: HttpFetcher,
    cache: PageCache,
}

impl CachedFetcher {
    pub fn new(http: HttpFetcher, cache: PageCache) -> Self {
        Self { http, cache }
    }

    pub fn http(&self) -> &HttpFetcher {
        &self.http
    }

    pub async fn fetch(&self, url: &str) -> anyhow::Result<CachedPage> {
        if let Some(body) = self.cache.lookup(url).await? {
            info!(url, bytes = body.len(), "retrieved from cache");
            return Ok(CachedPage {
                url: url.to_string(),
                body,
                from_cache: true,
                fetched_at: Utc::now(),
            });
        }

        let resp = self
            .http
            .fetch_bytes(url)
            .await
            .with_context(|| format!("fetching {url}"))?;
        self.cache.store(url, &resp.body).await?;
        info!(url, status = resp.status.as_u16(), bytes = resp.body.len(), "retrieved from website");
        Ok(CachedPage {
            url: url.to_string(),
            body: resp.body,
            from_cache: false,
            fetched_at: Utc::now(),
        })
    }
}
