//! Task definitions for the scheduler.
//!
//! This module defines the unit of work handled by the task scheduler:
//!
//! - `Task`: a payload plus the bookkeeping the scheduler needs to retry it
//! - `TaskState`: lifecycle of a task inside one batch
//! - `WorkUnit`: the collaborator-supplied code that executes a payload
//! - `WorkContext`: what a work unit may observe about the attempt it runs

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::TaskError;

use super::slot::SlotId;

/// Default worker class assigned to tasks created without one.
pub const DEFAULT_WORKER_CLASS: &str = "default";

/// Unique identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// `Failed` is transient: the last attempt failed and the task is waiting
/// for its backoff delay before returning to `Pending`. `Succeeded` and
/// `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Abandoned,
}

impl TaskState {
    /// Returns true for states a task never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Abandoned)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Abandoned => "abandoned",
        };
        write!(f, "{}", name)
    }
}

/// A unit of work submitted to the scheduler.
///
/// The payload is opaque to the scheduler. While an attempt runs the payload
/// is moved into the worker executing it (so `payload` is `None` exactly when
/// the task is `Running`) and moved back with the worker's report.
#[derive(Debug)]
pub struct Task<P> {
    id: TaskId,
    worker_class: String,
    payload: Option<P>,
    attempts: u32,
    state: TaskState,
    last_error: Option<TaskError>,
}

impl<P> Task<P> {
    /// Creates a pending task for the default worker class.
    pub fn new(payload: P) -> Self {
        Self {
            id: TaskId::new(),
            worker_class: DEFAULT_WORKER_CLASS.to_string(),
            payload: Some(payload),
            attempts: 0,
            state: TaskState::Pending,
            last_error: None,
        }
    }

    /// Sets the worker class (execution site label) of the task.
    pub fn with_worker_class(mut self, class: impl Into<String>) -> Self {
        self.worker_class = class.into();
        self
    }

    /// Overrides the generated identifier.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn worker_class(&self) -> &str {
        &self.worker_class
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn last_error(&self) -> Option<&TaskError> {
        self.last_error.as_ref()
    }

    /// Returns the payload if the task currently holds it.
    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    /// Hands the payload to a worker and starts a new attempt.
    ///
    /// Returns `None` if the task is not pending or its payload is out.
    pub(crate) fn start_attempt(&mut self) -> Option<P> {
        if self.state != TaskState::Pending {
            return None;
        }
        let payload = self.payload.take()?;
        self.attempts += 1;
        self.state = TaskState::Running;
        Some(payload)
    }

    /// Takes the payload back from a worker after an attempt.
    pub(crate) fn return_payload(&mut self, payload: P) {
        self.payload = Some(payload);
    }

    pub(crate) fn mark_succeeded(&mut self) {
        self.state = TaskState::Succeeded;
        self.last_error = None;
    }

    /// Records a failed attempt that will be retried after backoff.
    pub(crate) fn mark_failed(&mut self, error: TaskError) {
        self.state = TaskState::Failed;
        self.last_error = Some(error);
    }

    /// Moves a failed task back to the ready state once its backoff elapsed.
    pub(crate) fn mark_ready(&mut self) {
        if self.state == TaskState::Failed {
            self.state = TaskState::Pending;
        }
    }

    pub(crate) fn mark_abandoned(&mut self, error: TaskError) {
        self.state = TaskState::Abandoned;
        self.last_error = Some(error);
    }
}

/// What a work unit can observe about the attempt it is running.
#[derive(Debug, Clone)]
pub struct WorkContext {
    /// Task being executed.
    pub task_id: TaskId,
    /// Slot executing the task.
    pub slot_id: SlotId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Worker class of the task.
    pub worker_class: String,
    cancelled: watch::Receiver<bool>,
}

impl WorkContext {
    pub(crate) fn new(
        task_id: TaskId,
        slot_id: SlotId,
        attempt: u32,
        worker_class: String,
        cancelled: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task_id,
            slot_id,
            attempt,
            worker_class,
            cancelled,
        }
    }

    /// Returns true once the batch deadline has passed.
    ///
    /// Long-running work units should check this between steps and give up
    /// early; the scheduler will not retry after cancellation.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves when the batch is cancelled.
    pub async fn cancelled(&mut self) {
        while !*self.cancelled.borrow() {
            if self.cancelled.changed().await.is_err() {
                // Sender gone: the batch is over.
                return;
            }
        }
    }
}

/// Collaborator-supplied unit of work executed once per task attempt.
///
/// Implementations must be safe to invoke concurrently and must not assume
/// any state shared with the caller beyond the payload.
#[async_trait]
pub trait WorkUnit: Send + Sync + 'static {
    /// Input handed to each attempt.
    type Payload: Send + Sync + 'static;
    /// Value produced by a successful attempt.
    type Output: Send + 'static;

    /// Executes one attempt.
    async fn execute(
        &self,
        payload: &Self::Payload,
        ctx: &WorkContext,
    ) -> Result<Self::Output, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("payload");
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.attempts(), 0);
        assert_eq!(task.worker_class(), DEFAULT_WORKER_CLASS);
        assert_eq!(task.payload(), Some(&"payload"));
        assert!(task.last_error().is_none());
    }

    #[test]
    fn test_attempt_moves_payload_out_and_back() {
        let mut task = Task::new(7u32).with_worker_class("local");

        let payload = task.start_attempt().expect("pending task should start");
        assert_eq!(payload, 7);
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.attempts(), 1);
        assert!(task.payload().is_none());

        // A running task cannot be started twice.
        assert!(task.start_attempt().is_none());

        task.return_payload(payload);
        task.mark_failed(TaskError::transient("flaky"));
        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.start_attempt().is_none());

        task.mark_ready();
        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.start_attempt().is_some());
        assert_eq!(task.attempts(), 2);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Abandoned.is_terminal());
        assert!(!TaskState::Failed.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
    }

    #[test]
    fn test_mark_ready_only_from_failed() {
        let mut task = Task::new(());
        task.mark_abandoned(TaskError::terminal("gone"));
        task.mark_ready();
        assert_eq!(task.state(), TaskState::Abandoned);
    }

    #[tokio::test]
    async fn test_work_context_cancellation() {
        let (tx, rx) = watch::channel(false);
        let mut ctx = WorkContext::new(TaskId::new(), SlotId::new(0), 1, "local".into(), rx);
        assert!(!ctx.is_cancelled());

        tx.send(true).expect("receiver alive");
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
