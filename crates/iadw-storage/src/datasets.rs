//! Local copies of remote datasets under a deterministic directory layout.

use std::path::{Path, PathBuf};

use anyhow::Context;
use iadw_core::SourceRecord;
use tokio::fs;
use tracing::info;

use crate::fetch::HttpFetcher;
use crate::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDataset {
    pub source_url: String,
    pub path: PathBuf,
    /// False when an existing local copy was kept.
    pub downloaded: bool,
}

#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

fn path_segment(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<country>/<region>/<city>/<last_update>_<file name>`
    pub fn relative_path(record: &SourceRecord) -> PathBuf {
        PathBuf::from(path_segment(&record.country))
            .join(path_segment(&record.region))
            .join(path_segment(&record.city))
            .join(path_segment(&format!(
                "{}_{}",
                record.last_update,
                record.file_name()
            )))
    }

    pub fn local_path(&self, record: &SourceRecord) -> PathBuf {
        self.root.join(Self::relative_path(record))
    }

    /// Download `record` unless a local copy exists and `replace` is false.
    pub async fn download(
        &self,
        http: &HttpFetcher,
        record: &SourceRecord,
        replace: bool,
    ) -> anyhow::Result<StoredDataset> {
        let path = self.local_path(record);

        let exists = fs::try_exists(&path)
            .await
            .with_context(|| format!("checking dataset path {}", path.display()))?;
        if exists && !replace {
            info!(path = %path.display(), "dataset already exists locally");
            return Ok(StoredDataset {
                source_url: record.source_url.clone(),
                path,
                downloaded: false,
            });
        }

        let resp = http
            .fetch_bytes(&record.source_url)
            .await
            .with_context(|| format!("downloading {}", record.source_url))?;
        write_atomic(&path, &resp.body).await?;
        info!(path = %path.display(), bytes = resp.body.len(), "dataset saved locally");

        Ok(StoredDataset {
            source_url: record.source_url.clone(),
            path,
            downloaded: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpClientConfig;
    use crate::test_support::serve;
    use iadw_core::decompose;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    #[test]
    fn local_path_follows_location_and_vintage() {
        let record = decompose(
            "http://data.insideairbnb.com/france/ile-de-france/paris/2019-11-05/visualisations/listings.csv",
        )
        .unwrap();
        assert_eq!(
            DatasetStore::relative_path(&record),
            PathBuf::from("france/ile-de-france/paris/2019-11-05_listings.csv")
        );
    }

    #[test]
    fn traversal_segments_are_neutralised() {
        let record = SourceRecord {
            source_url: "http://evil.test/a/../x/y/listings.csv".into(),
            country: "..".into(),
            region: "a".into(),
            city: ".".into(),
            last_update: "2020".into(),
        };
        let rel = DatasetStore::relative_path(&record);
        assert_eq!(rel, PathBuf::from("_/a/_/2020_listings.csv"));
    }

    #[tokio::test]
    async fn existing_copy_is_kept_unless_replacing() {
        let (base, hits) = serve(vec![(
            "/switzerland/geneva/geneva/2020-02-27/visualisations/listings.csv",
            "200 OK",
            "id,name\n1,flat\n",
        )])
        .await;
        let record = decompose(&format!(
            "{base}/switzerland/geneva/geneva/2020-02-27/visualisations/listings.csv"
        ))
        .unwrap();
        let dir = tempdir().expect("tempdir");
        let store = DatasetStore::new(dir.path());
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();

        let first = store.download(&http, &record, false).await.unwrap();
        let second = store.download(&http, &record, false).await.unwrap();
        let third = store.download(&http, &record, true).await.unwrap();

        assert!(first.downloaded);
        assert!(!second.downloaded);
        assert!(third.downloaded);
        assert_eq!(first.path, second.path);
        assert_eq!(std::fs::read_to_string(&first.path).unwrap(), "id,name\n1,flat\n");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
