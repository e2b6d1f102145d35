//! Aggregated results of one scheduler batch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

use super::slot::WorkerSlot;
use super::task::{TaskId, TaskState};

/// Final outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome<O> {
    /// Identifier of the task.
    pub task_id: TaskId,
    /// Worker class the task was submitted with.
    pub worker_class: String,
    /// Terminal state (`Succeeded` or `Abandoned`).
    pub state: TaskState,
    /// Number of attempts made.
    pub attempts: u32,
    /// Output of the successful attempt.
    pub output: Option<O>,
    /// Error that caused abandonment.
    pub error: Option<TaskError>,
    /// Whether the task was abandoned because the batch deadline passed.
    pub timed_out: bool,
}

impl<O> TaskOutcome<O> {
    pub fn is_success(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

/// Result of a scheduler batch. Partial success is the normal case.
#[derive(Debug, Clone)]
pub struct BatchResult<O> {
    /// Identifier of the batch.
    pub batch_id: Uuid,
    /// One outcome per submitted task, in submission order.
    pub outcomes: Vec<TaskOutcome<O>>,
    /// Number of worker slots torn down and replaced.
    pub slots_recycled: u32,
    /// Slot table as it stood when the batch finished.
    pub slots: Vec<WorkerSlot>,
    /// Highest number of attempts that ran at the same time.
    pub peak_concurrency: usize,
    /// Whether the batch deadline expired before every task finished.
    pub timed_out: bool,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the batch.
    pub elapsed: Duration,
}

impl<O> BatchResult<O> {
    /// Number of tasks that succeeded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of tasks that were abandoned (including deadline timeouts).
    pub fn abandoned(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == TaskState::Abandoned)
            .count()
    }

    /// Iterates over the outputs of successful tasks.
    pub fn outputs(&self) -> impl Iterator<Item = &O> {
        self.outcomes.iter().filter_map(|o| o.output.as_ref())
    }

    /// Consumes the result and returns the outputs of successful tasks.
    pub fn into_outputs(self) -> Vec<O> {
        self.outcomes.into_iter().filter_map(|o| o.output).collect()
    }

    /// Builds the serialisable summary reported through the control surface.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id,
            total: self.outcomes.len(),
            succeeded: self.succeeded(),
            abandoned: self.abandoned(),
            timed_out_tasks: self.outcomes.iter().filter(|o| o.timed_out).count(),
            slots_recycled: self.slots_recycled,
            peak_concurrency: self.peak_concurrency,
            deadline_expired: self.timed_out,
            started_at: self.started_at,
            duration_ms: self.elapsed.as_millis() as u64,
        }
    }
}

/// Serialisable summary of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub abandoned: usize,
    pub timed_out_tasks: usize,
    pub slots_recycled: u32,
    pub peak_concurrency: usize,
    pub deadline_expired: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl BatchSummary {
    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / self.total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(state: TaskState, output: Option<u32>, timed_out: bool) -> TaskOutcome<u32> {
        TaskOutcome {
            task_id: TaskId::new(),
            worker_class: "local".to_string(),
            state,
            attempts: 1,
            output,
            error: None,
            timed_out,
        }
    }

    #[test]
    fn test_batch_counts_and_summary() {
        let result = BatchResult {
            batch_id: Uuid::new_v4(),
            outcomes: vec![
                outcome(TaskState::Succeeded, Some(1), false),
                outcome(TaskState::Succeeded, Some(2), false),
                outcome(TaskState::Abandoned, None, false),
                outcome(TaskState::Abandoned, None, true),
            ],
            slots_recycled: 1,
            slots: Vec::new(),
            peak_concurrency: 2,
            timed_out: true,
            started_at: Utc::now(),
            elapsed: Duration::from_millis(1500),
        };

        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.abandoned(), 2);
        assert_eq!(result.outputs().copied().collect::<Vec<_>>(), vec![1, 2]);

        let summary = result.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.timed_out_tasks, 1);
        assert_eq!(summary.duration_ms, 1500);
        assert!(summary.deadline_expired);
        assert!((summary.success_rate() - 50.0).abs() < f64::EPSILON);

        assert_eq!(result.into_outputs(), vec![1, 2]);
    }

    #[test]
    fn test_empty_summary_rate() {
        let result: BatchResult<()> = BatchResult {
            batch_id: Uuid::new_v4(),
            outcomes: Vec::new(),
            slots_recycled: 0,
            slots: Vec::new(),
            peak_concurrency: 0,
            timed_out: false,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        };
        assert!((result.summary().success_rate() - 0.0).abs() < f64::EPSILON);
    }
}
