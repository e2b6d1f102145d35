//! Error types shared across lead-sniper subsystems.
//!
//! Each subsystem owns its own error enum; the ones defined here cross module
//! boundaries:
//! - Work unit failures reported to the task scheduler
//! - Source adapter failures (fetching candidate records)
//! - Storage/sync failures raised by record stores

use thiserror::Error;

/// Failure of a single work-unit attempt.
///
/// The scheduler only distinguishes two classes: transient failures are
/// retried until the retry ceiling is reached, terminal failures abandon the
/// task immediately. Neither ever propagates past the batch result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Terminal failure: {0}")]
    Terminal(String),
}

impl TaskError {
    /// Builds a transient (retryable) error.
    pub fn transient(message: impl Into<String>) -> Self {
        TaskError::Transient(message.into())
    }

    /// Builds a terminal (non-retryable) error.
    pub fn terminal(message: impl Into<String>) -> Self {
        TaskError::Terminal(message.into())
    }

    /// Returns true if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Transient(_))
    }

    /// Returns the error message without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            TaskError::Transient(msg) | TaskError::Terminal(msg) => msg,
        }
    }
}

/// Errors that can occur while fetching records from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source '{0}' is not registered")]
    UnknownSource(String),

    #[error("HTTP request to '{url}' failed: {message}")]
    Request { url: String, message: String },

    #[error("Source '{url}' answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode payload from '{source_id}': {message}")]
    Decode { source_id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SourceError {
    /// Classifies the failure for the scheduler.
    ///
    /// Connection problems and server-side errors are worth retrying; a
    /// missing source, a client error or an undecodable payload is not.
    pub fn into_task_error(self) -> TaskError {
        match &self {
            SourceError::Request { .. } => TaskError::Transient(self.to_string()),
            SourceError::Status { status, .. } if *status >= 500 || *status == 429 => {
                TaskError::Transient(self.to_string())
            }
            SourceError::Io(_) => TaskError::Transient(self.to_string()),
            _ => TaskError::Terminal(self.to_string()),
        }
    }
}

impl From<SourceError> for TaskError {
    fn from(err: SourceError) -> Self {
        err.into_task_error()
    }
}

/// Errors raised by record stores.
///
/// Duplicate identifiers are not an error: stores absorb them and report
/// them through the write receipt.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store unreachable: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store rejected the write: {0}")]
    Rejected(String),
}

impl StorageError {
    /// Returns true when the failure means the store's environment is down
    /// rather than the write itself being bad.
    pub fn is_unreachable(&self) -> bool {
        match self {
            StorageError::Connection(_) => true,
            StorageError::Query(sqlx::Error::Io(_))
            | StorageError::Query(sqlx::Error::PoolTimedOut)
            | StorageError::Query(sqlx::Error::PoolClosed) => true,
            _ => false,
        }
    }
}
