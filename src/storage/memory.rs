//! In-process record store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AcceptedRecord, RecordStore, WriteReceipt};
use crate::error::StorageError;
use crate::router::Route;
use crate::validation::RawRecord;

/// Keeps accepted records in memory, keyed by record id.
///
/// Needs no environment, so its writes run on every route.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, AcceptedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, AcceptedRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stored records ordered by id.
    pub fn records(&self) -> Vec<AcceptedRecord> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn required_route(&self) -> Route {
        Route::Offline
    }

    async fn write_batch(&self, records: &[AcceptedRecord]) -> Result<WriteReceipt, StorageError> {
        let mut stored = self.lock();
        let mut receipt = WriteReceipt::default();
        for record in records {
            if stored.contains_key(&record.record_id) {
                receipt.duplicates += 1;
            } else {
                stored.insert(record.record_id.clone(), record.clone());
                receipt.written += 1;
            }
        }
        Ok(receipt)
    }

    async fn stored_records(&self) -> Result<Vec<RawRecord>, StorageError> {
        Ok(self.lock().values().map(|r| r.record.clone()).collect())
    }
}
