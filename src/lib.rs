//! lead-sniper: distressed-property lead acquisition.
//!
//! This library fetches candidate leads from public sources with a bounded,
//! self-healing worker pool, routes work between a local and a cloud
//! environment, scores every record through a three-stage validation gate
//! and delivers accepted leads to a store.

pub mod cli;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod router;
pub mod scheduler;
pub mod sources;
pub mod storage;
pub mod validation;

// Re-export commonly used types
pub use error::{SourceError, StorageError, TaskError};
pub use pipeline::{PipelineConfig, PipelineController, RunReport};
pub use router::{Route, RouteDecision, SmartRouter};
pub use scheduler::{TaskScheduler, WorkUnit};
pub use validation::{RawRecord, ValidationGate, ValidationLevel, ValidationResult, Verdict};
