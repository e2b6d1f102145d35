//! Source adapters: where candidate records come from.
//!
//! Sources are declared in configuration and resolved by id through a
//! `SourceRegistry`. The scheduler runs one `FetchWork` attempt per source;
//! the worker class of the task decides whether the fetch happens locally or
//! through the cloud runner.
//!
//! ```yaml
//! sources:
//!   - id: county-tax-roll
//!     kind: json_api
//!     url: https://data.county.example.gov/delinquent.json
//!     records_pointer: /data/rows
//!   - id: court-filings
//!     kind: json_file
//!     path: ./exports/court.json
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{SourceError, TaskError};
use crate::scheduler::{WorkContext, WorkUnit};
use crate::validation::RawRecord;

/// Worker class of tasks executed on this machine.
pub const LOCAL_WORKER_CLASS: &str = "local";

/// Worker class of tasks delegated to the cloud runner.
pub const CLOUD_WORKER_CLASS: &str = "cloud";

/// Default timeout for source HTTP requests.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// How to obtain the records of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceAdapter {
    /// HTTP endpoint answering a JSON array, optionally nested under a JSON
    /// pointer.
    JsonApi {
        url: String,
        #[serde(default)]
        records_pointer: Option<String>,
    },
    /// JSON file containing an array of records.
    JsonFile { path: PathBuf },
    /// Records embedded in the configuration.
    Inline {
        #[serde(default)]
        records: Vec<Value>,
    },
}

/// A configured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub id: String,
    #[serde(flatten)]
    pub adapter: SourceAdapter,
}

impl SourceDefinition {
    pub fn new(id: impl Into<String>, adapter: SourceAdapter) -> Self {
        Self {
            id: id.into(),
            adapter,
        }
    }
}

/// Extracts records from a JSON document.
///
/// Non-object entries are skipped. A document that is not an array (at the
/// pointer, if any) is a decode error.
fn extract_records(
    source_id: &str,
    document: Value,
    pointer: Option<&str>,
) -> Result<Vec<RawRecord>, SourceError> {
    let rows = match pointer {
        Some(pointer) => document.pointer(pointer).cloned().ok_or_else(|| SourceError::Decode {
            source_id: source_id.to_string(),
            message: format!("pointer '{}' not found", pointer),
        })?,
        None => document,
    };

    let Value::Array(rows) = rows else {
        return Err(SourceError::Decode {
            source_id: source_id.to_string(),
            message: "expected a JSON array of records".to_string(),
        });
    };

    let total = rows.len();
    let records: Vec<RawRecord> = rows
        .into_iter()
        .filter_map(|row| RawRecord::from_value(source_id, row))
        .collect();

    if records.len() < total {
        warn!(
            source_id = source_id,
            skipped = total - records.len(),
            "Skipped non-object rows"
        );
    }

    Ok(records)
}

impl SourceAdapter {
    /// Fetches every record the source currently exposes.
    ///
    /// # Errors
    ///
    /// Returns a `SourceError`; see `SourceError::into_task_error` for how it
    /// is classified by the scheduler.
    pub async fn fetch(
        &self,
        source_id: &str,
        client: &reqwest::Client,
    ) -> Result<Vec<RawRecord>, SourceError> {
        match self {
            SourceAdapter::JsonApi {
                url,
                records_pointer,
            } => {
                let response = client.get(url).send().await.map_err(|e| SourceError::Request {
                    url: url.clone(),
                    message: e.to_string(),
                })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(SourceError::Status {
                        url: url.clone(),
                        status: status.as_u16(),
                    });
                }

                let document: Value = response.json().await.map_err(|e| SourceError::Decode {
                    source_id: source_id.to_string(),
                    message: e.to_string(),
                })?;
                extract_records(source_id, document, records_pointer.as_deref())
            }
            SourceAdapter::JsonFile { path } => {
                let content = tokio::fs::read_to_string(path).await?;
                let document: Value = serde_json::from_str(&content)?;
                extract_records(source_id, document, None)
            }
            SourceAdapter::Inline { records } => {
                extract_records(source_id, Value::Array(records.clone()), None)
            }
        }
    }
}

/// Registered sources, keyed by id.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceAdapter>,
    client: reqwest::Client,
}

impl SourceRegistry {
    pub fn new(definitions: impl IntoIterator<Item = SourceDefinition>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(definitions, client)
    }

    pub fn with_client(
        definitions: impl IntoIterator<Item = SourceDefinition>,
        client: reqwest::Client,
    ) -> Self {
        let sources = definitions
            .into_iter()
            .map(|def| (def.id, def.adapter))
            .collect();
        Self { sources, client }
    }

    /// Source ids in a stable order.
    pub fn ids(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceAdapter> {
        self.sources.get(source_id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetches the records of one source.
    pub async fn fetch(&self, source_id: &str) -> Result<Vec<RawRecord>, SourceError> {
        let adapter = self
            .sources
            .get(source_id)
            .ok_or_else(|| SourceError::UnknownSource(source_id.to_string()))?;
        let records = adapter.fetch(source_id, &self.client).await?;
        debug!(source_id = source_id, records = records.len(), "Source fetched");
        Ok(records)
    }
}

/// Payload of a fetch task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub source_id: String,
}

impl FetchRequest {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
        }
    }
}

/// Work unit fetching one source, locally or through the cloud runner.
pub struct FetchWork {
    registry: std::sync::Arc<SourceRegistry>,
    cloud_runner: Option<String>,
    client: reqwest::Client,
}

impl FetchWork {
    pub fn new(registry: std::sync::Arc<SourceRegistry>, cloud_runner: Option<String>) -> Self {
        Self {
            registry,
            cloud_runner,
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_remote(&self, endpoint: &str, source_id: &str) -> Result<Vec<RawRecord>, SourceError> {
        let response = self
            .client
            .post(endpoint)
            .json(&json!({ "source_id": source_id }))
            .send()
            .await
            .map_err(|e| SourceError::Request {
                url: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let document: Value = response.json().await.map_err(|e| SourceError::Decode {
            source_id: source_id.to_string(),
            message: e.to_string(),
        })?;
        extract_records(source_id, document, None)
    }
}

#[async_trait]
impl WorkUnit for FetchWork {
    type Payload = FetchRequest;
    type Output = Vec<RawRecord>;

    async fn execute(
        &self,
        payload: &FetchRequest,
        ctx: &WorkContext,
    ) -> Result<Vec<RawRecord>, TaskError> {
        if ctx.is_cancelled() {
            return Err(TaskError::terminal("batch cancelled before fetch"));
        }

        debug!(
            task_id = %ctx.task_id,
            source_id = %payload.source_id,
            worker_class = %ctx.worker_class,
            attempt = ctx.attempt,
            "Fetching source"
        );

        let result = if ctx.worker_class == CLOUD_WORKER_CLASS {
            match &self.cloud_runner {
                Some(endpoint) => self.fetch_remote(endpoint, &payload.source_id).await,
                None => return Err(TaskError::terminal("no cloud runner endpoint configured")),
            }
        } else {
            self.registry.fetch(&payload.source_id).await
        };

        result.map_err(SourceError::into_task_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_definition_from_yaml() {
        let yaml = r#"
- id: tax
  kind: json_api
  url: https://data.example.gov/rows.json
  records_pointer: /data
- id: court
  kind: json_file
  path: ./court.json
- id: seed
  kind: inline
  records:
    - { address: "1 Main St" }
"#;
        let defs: Vec<SourceDefinition> = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(defs.len(), 3);
        assert_eq!(
            defs[0].adapter,
            SourceAdapter::JsonApi {
                url: "https://data.example.gov/rows.json".to_string(),
                records_pointer: Some("/data".to_string()),
            }
        );
        assert!(matches!(defs[2].adapter, SourceAdapter::Inline { ref records } if records.len() == 1));
    }

    #[test]
    fn test_extract_records_with_pointer() {
        let doc = json!({ "data": { "rows": [{ "id": "a" }, 7, { "id": "b" }] } });
        let records = extract_records("s", doc, Some("/data/rows")).expect("extract");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].record_id(), "b");

        let err = extract_records("s", json!({ "rows": 1 }), None).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_registry_fetches_inline_and_file_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.json");
        std::fs::write(&path, r#"[{"id": "f-1"}, {"id": "f-2"}]"#).expect("write");

        let registry = SourceRegistry::new(vec![
            SourceDefinition::new(
                "inline",
                SourceAdapter::Inline {
                    records: vec![json!({ "id": "i-1" })],
                },
            ),
            SourceDefinition::new("file", SourceAdapter::JsonFile { path }),
        ]);

        assert_eq!(registry.ids(), vec!["file".to_string(), "inline".to_string()]);
        assert_eq!(registry.fetch("inline").await.expect("inline").len(), 1);
        assert_eq!(registry.fetch("file").await.expect("file").len(), 2);
        assert!(matches!(
            registry.fetch("missing").await,
            Err(SourceError::UnknownSource(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_transient() {
        let registry = SourceRegistry::new(vec![SourceDefinition::new(
            "file",
            SourceAdapter::JsonFile {
                path: PathBuf::from("/nonexistent/rows.json"),
            },
        )]);
        let err = registry.fetch("file").await.unwrap_err();
        assert!(err.into_task_error().is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_work_through_scheduler() {
        use crate::scheduler::{SchedulerConfig, Task, TaskScheduler};

        let registry = Arc::new(SourceRegistry::new(vec![SourceDefinition::new(
            "seed",
            SourceAdapter::Inline {
                records: vec![json!({ "id": "a" }), json!({ "id": "b" })],
            },
        )]));
        let scheduler = TaskScheduler::new(SchedulerConfig::default(), FetchWork::new(registry, None));

        let tasks = vec![
            Task::new(FetchRequest::new("seed")).with_worker_class(LOCAL_WORKER_CLASS),
            Task::new(FetchRequest::new("seed")).with_worker_class(CLOUD_WORKER_CLASS),
        ];
        let result = scheduler.submit(tasks, 2).await;

        assert_eq!(result.outcomes[0].output.as_ref().map(Vec::len), Some(2));
        // No cloud runner configured: abandoned without retries.
        assert_eq!(result.outcomes[1].attempts, 1);
        assert!(result.outcomes[1].output.is_none());
    }
}
