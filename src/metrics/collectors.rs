//! High-level recording interface over the raw Prometheus metrics.
//!
//! Components call `MetricsCollector` instead of touching the statics so that
//! labeling stays consistent and recording is a no-op before `init_metrics()`.

use super::prometheus::{
    ACTIVE_WORKERS, COMPOSITE_SCORE, EXPIRED_OPERATIONS, PENDING_OPERATIONS, RECORDS_STORED,
    ROUTE_LABELS, ROUTE_STATE, SLOTS_RECYCLED, TASKS_TOTAL, TASK_ATTEMPT_DURATION,
    VALIDATION_VERDICTS,
};

/// Metrics collector for recording lead-sniper operational metrics.
///
/// # Example
///
/// ```ignore
/// use lead_sniper::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_task("succeeded", "local");
/// collector.record_verdict("accepted", "standard", 94.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a task reaching a terminal state.
    ///
    /// # Arguments
    ///
    /// * `status` - Final task state (`succeeded` or `abandoned`)
    /// * `worker_class` - Execution site label of the task
    pub fn record_task(&self, status: &str, worker_class: &str) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total
                .with_label_values(&[status, worker_class])
                .inc();
        }

        tracing::trace!(
            status = status,
            worker_class = worker_class,
            "Recorded task metric"
        );
    }

    /// Record the duration of one attempt.
    pub fn record_attempt(&self, worker_class: &str, duration_secs: f64) {
        if let Some(duration) = TASK_ATTEMPT_DURATION.get() {
            duration
                .with_label_values(&[worker_class])
                .observe(duration_secs);
        }
    }

    /// Update the count of attempts currently executing.
    pub fn update_workers(&self, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.set(count as f64);
        }
    }

    /// Record a worker slot being torn down and replaced.
    pub fn record_slot_recycled(&self) {
        if let Some(counter) = SLOTS_RECYCLED.get() {
            counter.inc();
        }
    }

    /// Update the number of operations waiting for `route`.
    ///
    /// # Arguments
    ///
    /// * `route` - Required route of the queue (e.g. `cloud_only`)
    /// * `depth` - Current number of pending operations for that route
    pub fn update_pending(&self, route: &str, depth: usize) {
        if let Some(pending) = PENDING_OPERATIONS.get() {
            pending.with_label_values(&[route]).set(depth as f64);
        }

        tracing::trace!(route = route, depth = depth, "Updated pending operations metric");
    }

    /// Record pending operations dropped after the expiry window.
    pub fn record_expired(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(counter) = EXPIRED_OPERATIONS.get() {
            counter.inc_by(count as f64);
        }
    }

    /// Mark `route` as the current decision and clear the other routes.
    pub fn set_route(&self, route: &str) {
        if let Some(state) = ROUTE_STATE.get() {
            for label in ROUTE_LABELS {
                let value = if label == route { 1.0 } else { 0.0 };
                state.with_label_values(&[label]).set(value);
            }
        }
    }

    /// Record one validation verdict and its composite score.
    ///
    /// # Arguments
    ///
    /// * `verdict` - `accepted`, `borderline` or `rejected`
    /// * `level` - Validation level the record was judged at
    /// * `composite` - Composite confidence score between 0 and 100
    pub fn record_verdict(&self, verdict: &str, level: &str, composite: f64) {
        if let Some(verdicts) = VALIDATION_VERDICTS.get() {
            verdicts.with_label_values(&[verdict, level]).inc();
        }

        if let Some(score) = COMPOSITE_SCORE.get() {
            score.observe(composite);
        }

        tracing::trace!(
            verdict = verdict,
            level = level,
            composite = composite,
            "Recorded validation metric"
        );
    }

    /// Record records written to a sink.
    pub fn record_stored(&self, sink: &str, count: usize) {
        if let Some(stored) = RECORDS_STORED.get() {
            stored.with_label_values(&[sink]).inc_by(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_scheduler_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_task("succeeded", "local");
        collector.record_task("abandoned", "cloud");
        collector.record_attempt("local", 0.25);
        collector.update_workers(4);
        collector.record_slot_recycled();
    }

    #[test]
    fn test_record_router_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.update_pending("cloud_only", 3);
        collector.record_expired(0);
        collector.record_expired(2);
        collector.set_route("local_only");

        if ROUTE_STATE.get().is_some() {
            let text = export_metrics();
            assert!(text.contains("lead_sniper_route"));
        }
    }

    #[test]
    fn test_record_validation_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_verdict("accepted", "standard", 94.0);
        collector.record_verdict("borderline", "standard", 87.5);
        collector.record_stored("memory", 10);
    }
}
