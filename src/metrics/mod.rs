//! Metrics module for Prometheus-based monitoring.
//!
//! This module provides metrics collection and export for lead-sniper
//! operations: scheduler throughput, slot recycling, route changes, pending
//! operations and validation verdicts.
//!
//! # Example
//!
//! ```ignore
//! use lead_sniper::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_task("succeeded", "local");
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, COMPOSITE_SCORE, EXPIRED_OPERATIONS, PENDING_OPERATIONS, RECORDS_STORED,
    REGISTRY, ROUTE_STATE, SLOTS_RECYCLED, TASKS_TOTAL, TASK_ATTEMPT_DURATION,
    VALIDATION_VERDICTS,
};
