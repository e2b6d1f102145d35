//! Cloud sync endpoint as a record store.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{AcceptedRecord, RecordStore, WriteReceipt};
use crate::error::StorageError;
use crate::router::Route;

/// Default timeout for one sync request.
const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SyncAnswer {
    written: usize,
    #[serde(default)]
    duplicates: usize,
}

/// POSTs accepted records to a cloud sync endpoint.
///
/// The endpoint receives `{"records": [...]}` and answers
/// `{"written": n, "duplicates": m}`. It is expected to deduplicate by
/// `record_id`.
#[derive(Debug, Clone)]
pub struct HttpStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_SYNC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(endpoint, client)
    }

    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RecordStore for HttpStore {
    fn name(&self) -> &str {
        "http"
    }

    fn required_route(&self) -> Route {
        Route::CloudOnly
    }

    async fn write_batch(&self, records: &[AcceptedRecord]) -> Result<WriteReceipt, StorageError> {
        if records.is_empty() {
            return Ok(WriteReceipt::default());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "records": records }))
            .send()
            .await
            .map_err(|e| StorageError::Connection(format!("{}: {}", self.endpoint, e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StorageError::Connection(format!(
                "{} answered {}",
                self.endpoint,
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected(format!(
                "{} answered {}: {}",
                self.endpoint,
                status.as_u16(),
                body
            )));
        }

        let answer: SyncAnswer = response
            .json()
            .await
            .map_err(|e| StorageError::Rejected(format!("malformed sync answer: {}", e)))?;

        debug!(endpoint = %self.endpoint, written = answer.written, "Cloud sync accepted batch");
        Ok(WriteReceipt {
            written: answer.written,
            duplicates: answer.duplicates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let store = HttpStore::new("http://127.0.0.1:9/sync");
        assert_eq!(store.write_batch(&[]).await.unwrap(), WriteReceipt::default());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        use crate::validation::{RawRecord, Verdict};

        let store = HttpStore::new("http://127.0.0.1:9/sync");
        let record = AcceptedRecord {
            record_id: "a".to_string(),
            record: RawRecord::new("tax-roll"),
            composite: 95.0,
            verdict: Verdict::Accepted,
            accepted_at: chrono::Utc::now(),
        };

        let err = store.write_batch(&[record]).await.unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(store.required_route(), Route::CloudOnly);
    }
}
