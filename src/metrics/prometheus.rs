//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by lead-sniper and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all lead-sniper metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of finished tasks, labeled by final status and worker class.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Duration of single task attempts in seconds, labeled by worker class.
pub static TASK_ATTEMPT_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of task attempts currently executing.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Total worker slots torn down after crossing the unhealthy threshold.
pub static SLOTS_RECYCLED: OnceLock<Counter> = OnceLock::new();

/// Pending operations waiting for a route, labeled by required route.
pub static PENDING_OPERATIONS: OnceLock<GaugeVec> = OnceLock::new();

/// Total pending operations dropped after the expiry window.
pub static EXPIRED_OPERATIONS: OnceLock<Counter> = OnceLock::new();

/// Current route decision: 1 for the active route, 0 otherwise.
pub static ROUTE_STATE: OnceLock<GaugeVec> = OnceLock::new();

/// Total validation verdicts, labeled by verdict and validation level.
pub static VALIDATION_VERDICTS: OnceLock<CounterVec> = OnceLock::new();

/// Distribution of composite confidence scores.
pub static COMPOSITE_SCORE: OnceLock<Histogram> = OnceLock::new();

/// Total records written to sinks, labeled by sink name.
pub static RECORDS_STORED: OnceLock<CounterVec> = OnceLock::new();

/// Route labels exported by `ROUTE_STATE`.
pub const ROUTE_LABELS: [&str; 4] = ["hybrid", "local_only", "cloud_only", "offline"];

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Recording
/// helpers silently do nothing until it has run.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
///
/// # Example
///
/// ```ignore
/// use lead_sniper::metrics::init_metrics;
///
/// init_metrics().expect("Failed to initialize metrics");
/// ```
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Scheduler metrics
    let tasks_total = CounterVec::new(
        Opts::new("lead_sniper_tasks_total", "Total number of finished tasks"),
        &["status", "worker_class"],
    )?;

    let task_attempt_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "lead_sniper_task_attempt_duration_seconds",
            "Duration of single task attempts in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["worker_class"],
    )?;

    let active_workers = Gauge::new(
        "lead_sniper_active_workers",
        "Number of task attempts currently executing",
    )?;

    let slots_recycled = Counter::new(
        "lead_sniper_slots_recycled_total",
        "Total worker slots replaced after consecutive failures",
    )?;

    // Router metrics
    let pending_operations = GaugeVec::new(
        Opts::new(
            "lead_sniper_pending_operations",
            "Operations waiting for their required route",
        ),
        &["route"],
    )?;

    let expired_operations = Counter::new(
        "lead_sniper_expired_operations_total",
        "Pending operations dropped after the expiry window",
    )?;

    let route_state = GaugeVec::new(
        Opts::new("lead_sniper_route", "Current route decision"),
        &["route"],
    )?;

    // Validation metrics
    let validation_verdicts = CounterVec::new(
        Opts::new(
            "lead_sniper_validation_verdicts_total",
            "Total validation verdicts",
        ),
        &["verdict", "level"],
    )?;

    let composite_score = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "lead_sniper_composite_score",
            "Distribution of composite confidence scores",
        )
        .buckets(vec![10.0, 25.0, 50.0, 60.0, 75.0, 85.0, 90.0, 95.0, 100.0]),
    )?;

    // Storage metrics
    let records_stored = CounterVec::new(
        Opts::new("lead_sniper_records_stored_total", "Records written to sinks"),
        &["sink"],
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_attempt_duration.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(slots_recycled.clone()))?;
    registry.register(Box::new(pending_operations.clone()))?;
    registry.register(Box::new(expired_operations.clone()))?;
    registry.register(Box::new(route_state.clone()))?;
    registry.register(Box::new(validation_verdicts.clone()))?;
    registry.register(Box::new(composite_score.clone()))?;
    registry.register(Box::new(records_stored.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_ATTEMPT_DURATION.set(task_attempt_duration);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = SLOTS_RECYCLED.set(slots_recycled);
    let _ = PENDING_OPERATIONS.set(pending_operations);
    let _ = EXPIRED_OPERATIONS.set(expired_operations);
    let _ = ROUTE_STATE.set(route_state);
    let _ = VALIDATION_VERDICTS.set(validation_verdicts);
    let _ = COMPOSITE_SCORE.set(composite_score);
    let _ = RECORDS_STORED.set(records_stored);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// # Returns
///
/// A string containing all metrics in Prometheus text format. If the registry
/// has not been initialized or encoding fails, returns a comment line
/// explaining why.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
