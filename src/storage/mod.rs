//! Record stores: where accepted leads end up.
//!
//! Every store is idempotent by record id: writing the same record twice
//! stores it once and reports the second write as a duplicate. Each store
//! names the route it needs, so the pipeline can hand the write to the
//! `SmartRouter` and have it queued while that environment is down.
//!
//! - **MemoryStore**: in-process, usable on any route
//! - **SqliteStore**: local SQLite file, needs the local environment
//! - **HttpStore**: cloud sync endpoint, needs the cloud environment
//!
//! # Usage
//!
//! ```rust,ignore
//! use lead_sniper::storage::{SinkConfig, StoreWrite};
//!
//! let store = SinkConfig::Sqlite { path: "./leads.db".into() }.build().await?;
//! let write = StoreWrite::new(store.clone(), accepted);
//! let dispatch = router.execute(Arc::new(write), store.required_route()).await;
//! ```

pub mod http;
pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StorageError;
use crate::metrics::MetricsCollector;
use crate::router::{OperationError, Route, RoutedOperation};
use crate::validation::{RawRecord, ValidationResult, Verdict};

/// A record that passed the validation gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedRecord {
    pub record_id: String,
    pub record: RawRecord,
    pub composite: f64,
    pub verdict: Verdict,
    pub accepted_at: DateTime<Utc>,
}

impl AcceptedRecord {
    pub fn new(record: RawRecord, result: &ValidationResult) -> Self {
        Self {
            record_id: result.record_id().to_string(),
            record,
            composite: result.composite(),
            verdict: result.verdict(),
            accepted_at: Utc::now(),
        }
    }
}

/// Outcome of one batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    /// Records newly stored.
    pub written: usize,
    /// Records skipped because their id was already stored.
    pub duplicates: usize,
}

/// Destination for accepted records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Route the store needs to be reachable.
    fn required_route(&self) -> Route;

    /// Stores a batch. Records whose id is already present are skipped.
    async fn write_batch(&self, records: &[AcceptedRecord]) -> Result<WriteReceipt, StorageError>;

    /// Records already stored, used to seed duplicate detection.
    ///
    /// Stores that cannot list their content return an empty list.
    async fn stored_records(&self) -> Result<Vec<RawRecord>, StorageError> {
        Ok(Vec::new())
    }
}

/// Store selection as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Memory,
    Sqlite { path: PathBuf },
    Http { endpoint: String },
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Sqlite {
            path: PathBuf::from("./data/leads.db"),
        }
    }
}

impl SinkConfig {
    /// Opens the configured store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if a SQLite file cannot be opened.
    pub async fn build(&self) -> Result<Arc<dyn RecordStore>, StorageError> {
        let store: Arc<dyn RecordStore> = match self {
            SinkConfig::Memory => Arc::new(MemoryStore::new()),
            SinkConfig::Sqlite { path } => Arc::new(SqliteStore::open(path).await?),
            SinkConfig::Http { endpoint } => Arc::new(HttpStore::new(endpoint.clone())),
        };
        info!(sink = store.name(), route = %store.required_route(), "Record store ready");
        Ok(store)
    }
}

/// A batch write handed to the router.
///
/// An unreachable store turns into `OperationError::RouteUnavailable`, which
/// makes the router queue the write instead of failing it.
pub struct StoreWrite {
    store: Arc<dyn RecordStore>,
    records: Vec<AcceptedRecord>,
    metrics: MetricsCollector,
}

impl StoreWrite {
    pub fn new(store: Arc<dyn RecordStore>, records: Vec<AcceptedRecord>) -> Self {
        Self {
            store,
            records,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RoutedOperation for StoreWrite {
    type Output = WriteReceipt;

    fn name(&self) -> &str {
        "store-write"
    }

    async fn run(&self, route: Route) -> Result<WriteReceipt, OperationError> {
        match self.store.write_batch(&self.records).await {
            Ok(receipt) => {
                self.metrics.record_stored(self.store.name(), receipt.written);
                info!(
                    sink = self.store.name(),
                    route = %route,
                    written = receipt.written,
                    duplicates = receipt.duplicates,
                    "Records stored"
                );
                Ok(receipt)
            }
            Err(e) if e.is_unreachable() => {
                warn!(sink = self.store.name(), error = %e, "Store unreachable");
                Err(OperationError::RouteUnavailable(e.to_string()))
            }
            Err(e) => Err(OperationError::Failed(e.to_string())),
        }
    }
}
