//! SQLite-backed store for accepted records on the local machine.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use super::{AcceptedRecord, RecordStore, WriteReceipt};
use crate::error::StorageError;
use crate::router::Route;
use crate::validation::RawRecord;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS accepted_records (
    record_id    TEXT NOT NULL PRIMARY KEY,
    source_id    TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    fields       TEXT NOT NULL,
    composite    REAL NOT NULL,
    verdict      TEXT NOT NULL,
    accepted_at  TEXT NOT NULL,
    stored_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_accepted_records_source ON accepted_records(source_id);
"#;

/// Stores accepted records in a local SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (or creates) the database file and its schema.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        info!(path = %path.display(), "Record store opened");
        Ok(Self { pool })
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM accepted_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("total") as u64)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn required_route(&self) -> Route {
        Route::LocalOnly
    }

    async fn write_batch(&self, records: &[AcceptedRecord]) -> Result<WriteReceipt, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut receipt = WriteReceipt::default();

        for record in records {
            let fields = serde_json::to_string(&record.record.fields)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO accepted_records (
                    record_id, source_id, collected_at, fields, composite, verdict, accepted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&record.record_id)
            .bind(&record.record.source_id)
            .bind(record.record.collected_at.to_rfc3339())
            .bind(fields)
            .bind(record.composite)
            .bind(record.verdict.as_str())
            .bind(record.accepted_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                receipt.duplicates += 1;
            } else {
                receipt.written += 1;
            }
        }

        tx.commit().await?;
        Ok(receipt)
    }

    async fn stored_records(&self) -> Result<Vec<RawRecord>, StorageError> {
        let rows = sqlx::query("SELECT record_id, source_id, collected_at, fields FROM accepted_records")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record_id: String = row.get("record_id");
            let fields: String = row.get("fields");
            let collected_at: String = row.get("collected_at");

            let fields: Map<String, Value> = match serde_json::from_str(&fields) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(record_id = %record_id, error = %e, "Skipping unreadable stored record");
                    continue;
                }
            };
            let collected_at = DateTime::parse_from_rfc3339(&collected_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            records.push(RawRecord {
                source_id: row.get("source_id"),
                collected_at,
                fields,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Verdict;

    fn accepted(id: &str) -> AcceptedRecord {
        AcceptedRecord {
            record_id: id.to_string(),
            record: RawRecord::new("tax-roll")
                .with_field("id", id)
                .with_field("address", "1 Main St"),
            composite: 97.5,
            verdict: Verdict::Accepted,
            accepted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("leads.db")).await.unwrap();

        let first = store.write_batch(&[accepted("a"), accepted("b")]).await.unwrap();
        assert_eq!(first, WriteReceipt { written: 2, duplicates: 0 });

        let second = store.write_batch(&[accepted("b"), accepted("c")]).await.unwrap();
        assert_eq!(second, WriteReceipt { written: 1, duplicates: 1 });

        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_stored_records_round_trip_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested").join("leads.db"))
            .await
            .unwrap();
        store.write_batch(&[accepted("a")]).await.unwrap();

        let records = store.stored_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_id, "tax-roll");
        assert_eq!(records[0].record_id(), "a");
        assert_eq!(records[0].get_str("address"), Some("1 Main St"));
    }
}
