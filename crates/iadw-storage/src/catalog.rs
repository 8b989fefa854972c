//! Catalog store: the append-only record of ingested source files, plus the
//! SQLite working tables the datasets are loaded into.
//!
//! The SQLite catalog keeps one record set per dataset table, so two targets
//! loading the same file into different tables each ingest it once.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use iadw_core::{InconsistentCatalog, SourceRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::tables::CsvTable;

pub const SOURCE_INFO_TABLE: &str = "source_info";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("catalog backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Inconsistent(#[from] InconsistentCatalog),
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn query_known_records(&self) -> Result<Vec<SourceRecord>, CatalogError>;

    /// Append-only insert; records whose `source_url` is already stored are ignored.
    /// Returns how many records were actually added.
    async fn persist_records(&self, records: &[SourceRecord]) -> Result<usize, CatalogError>;
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: Mutex<BTreeMap<String, SourceRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = SourceRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.source_url.clone(), r))
            .collect();
        Self {
            records: Mutex::new(map),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn query_known_records(&self) -> Result<Vec<SourceRecord>, CatalogError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn persist_records(&self, records: &[SourceRecord]) -> Result<usize, CatalogError> {
        let mut map = self.records.lock().await;
        let mut added = 0;
        for record in records {
            if !map.contains_key(&record.source_url) {
                map.insert(record.source_url.clone(), record.clone());
                added += 1;
            }
        }
        Ok(added)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn checked_table_name(name: &str) -> Result<&str, CatalogError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.eq_ignore_ascii_case(SOURCE_INFO_TABLE);
    if valid {
        Ok(name)
    } else {
        Err(CatalogError::InvalidTableName(name.to_string()))
    }
}

/// SQLite database holding the `source_info` catalog and the dataset tables.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url`, e.g. `sqlite://insideairbnb.db`.
    pub async fn connect(database_url: &str) -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Private in-memory database; a single connection keeps it alive.
    pub async fn in_memory() -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<(), CatalogError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS source_info (
                dataset_table TEXT NOT NULL,
                source_url TEXT NOT NULL,
                country TEXT NOT NULL,
                region TEXT NOT NULL,
                city TEXT NOT NULL,
                last_update TEXT NOT NULL,
                PRIMARY KEY (dataset_table, source_url)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Catalog of the files loaded into `table`.
    pub fn catalog(&self, table: &str) -> Result<SqliteCatalog, CatalogError> {
        let table = checked_table_name(table)?;
        Ok(SqliteCatalog {
            pool: self.pool.clone(),
            table: table.to_string(),
        })
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>, CatalogError> {
        let table = checked_table_name(table)?;
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(CatalogError::from))
            .collect()
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64, CatalogError> {
        let table = checked_table_name(table)?;
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Append `data` to `table`, creating the table or adding missing TEXT columns first.
    /// All rows land in one transaction.
    pub async fn load_table(&self, table: &str, data: &CsvTable) -> Result<u64, CatalogError> {
        let table = checked_table_name(table)?;
        if data.headers.is_empty() {
            return Ok(0);
        }
        let table_ident = quote_ident(table);
        let mut tx = self.pool.begin().await?;

        let columns = data
            .headers
            .iter()
            .map(|h| format!("{} TEXT", quote_ident(h)))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!("CREATE TABLE IF NOT EXISTS {table_ident} ({columns})"))
            .execute(&mut *tx)
            .await?;

        let existing: HashSet<String> = sqlx::query(&format!("PRAGMA table_info({table_ident})"))
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()?;
        for header in data.headers.iter().filter(|h| !existing.contains(*h)) {
            sqlx::query(&format!(
                "ALTER TABLE {table_ident} ADD COLUMN {} TEXT",
                quote_ident(header)
            ))
            .execute(&mut *tx)
            .await?;
        }

        let insert = format!(
            "INSERT INTO {table_ident} ({}) VALUES ({})",
            data.headers
                .iter()
                .map(|h| quote_ident(h))
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; data.headers.len()].join(", ")
        );
        let mut inserted = 0u64;
        for row in &data.rows {
            let mut query = sqlx::query(&insert);
            for value in row {
                query = query.bind(value.as_str());
            }
            inserted += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        info!(table, rows = inserted, "loaded rows");
        Ok(inserted)
    }
}

/// The `source_info` rows of one dataset table.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
    table: String,
}

impl SqliteCatalog {
    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn query_known_records(&self) -> Result<Vec<SourceRecord>, CatalogError> {
        let rows = sqlx::query(
            "SELECT source_url, country, region, city, last_update
             FROM source_info WHERE dataset_table = ? ORDER BY source_url",
        )
        .bind(&self.table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SourceRecord, CatalogError> {
                Ok(SourceRecord {
                    source_url: row.try_get("source_url")?,
                    country: row.try_get("country")?,
                    region: row.try_get("region")?,
                    city: row.try_get("city")?,
                    last_update: row.try_get("last_update")?,
                })
            })
            .collect()
    }

    async fn persist_records(&self, records: &[SourceRecord]) -> Result<usize, CatalogError> {
        let mut tx = self.pool.begin().await?;
        let mut added = 0usize;
        for record in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO source_info
                 (dataset_table, source_url, country, region, city, last_update)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&self.table)
            .bind(&record.source_url)
            .bind(&record.country)
            .bind(&record.region)
            .bind(&record.city)
            .bind(&record.last_update)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(added)
    }
}
