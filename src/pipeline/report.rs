//! Run reports and controller status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::router::{Route, RouteDecision};
use crate::scheduler::BatchSummary;

/// Summary of one pipeline run.
///
/// A run always produces a report, even when every source failed or no
/// environment was reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Route the run executed on.
    pub route: Route,
    /// Fetch batch summary. `None` when the run was deferred.
    pub batch: Option<BatchSummary>,
    /// Records returned by the sources.
    pub scraped: usize,
    pub accepted: usize,
    pub borderline: usize,
    pub rejected: usize,
    /// Records validated without the external reference.
    pub degraded: usize,
    /// Records newly written to the store.
    pub stored: usize,
    /// Records the store already had.
    pub duplicates: usize,
    /// Accepted records whose write was queued for a later route.
    pub queued_writes: usize,
    /// Queued writes cancelled because the process exited before their
    /// route returned. These records were not stored.
    #[serde(default)]
    pub cancelled_writes: usize,
    /// Sources not fetched because no environment was reachable.
    pub deferred_sources: Vec<String>,
    /// Records awaiting manual review.
    pub borderline_ids: Vec<String>,
    /// Non-fatal problems met during the run.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub(crate) fn begin(run_id: Uuid, route: Route) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            route,
            batch: None,
            scraped: 0,
            accepted: 0,
            borderline: 0,
            rejected: 0,
            degraded: 0,
            stored: 0,
            duplicates: 0,
            queued_writes: 0,
            cancelled_writes: 0,
            deferred_sources: Vec::new(),
            borderline_ids: Vec::new(),
            errors: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Whether the fetch batch hit its deadline.
    pub fn timed_out(&self) -> bool {
        self.batch.as_ref().is_some_and(|b| b.deadline_expired)
    }

    /// Whether the run was deferred because the route was offline.
    pub fn is_deferred(&self) -> bool {
        !self.deferred_sources.is_empty()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Snapshot of the controller, as returned by `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    /// Run in progress, if any.
    pub active_run: Option<Uuid>,
    /// Last route decision taken by the router.
    pub decision: Option<RouteDecision>,
    pub pending_operations: usize,
    pub pending_by_route: BTreeMap<Route, usize>,
    /// Operations dropped after waiting past the expiry window.
    pub expired_operations: u64,
    pub last_batch: Option<BatchSummary>,
    pub last_run: Option<RunReport>,
    pub runs_completed: u64,
}

impl PipelineStatus {
    pub fn is_running(&self) -> bool {
        self.active_run.is_some()
    }
}
