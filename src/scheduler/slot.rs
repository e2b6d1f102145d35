//! Worker slots: the execution contexts tasks are dispatched to.
//!
//! A slot runs at most one task at a time. It counts consecutive failures
//! and, once the unhealthy threshold is reached, is recycled: torn down and
//! replaced by a fresh slot instead of being reused.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::task::TaskId;

/// Identifier of a worker slot. Recycled slots get a new identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(u64);

impl SlotId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// State of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Idle,
    Busy,
    Unhealthy,
    Restarting,
}

/// A reusable execution context.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    id: SlotId,
    current_task: Option<TaskId>,
    consecutive_failures: u32,
    state: SlotState,
}

impl WorkerSlot {
    /// Creates an idle slot with a clean failure history.
    pub fn fresh(id: SlotId) -> Self {
        Self {
            id,
            current_task: None,
            consecutive_failures: 0,
            state: SlotState::Idle,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SlotState::Idle
    }

    /// Assigns a task to an idle slot. Returns false if the slot is not idle.
    pub(crate) fn assign(&mut self, task: TaskId) -> bool {
        if self.state != SlotState::Idle {
            return false;
        }
        self.current_task = Some(task);
        self.state = SlotState::Busy;
        true
    }

    /// Releases the slot after a successful attempt.
    pub(crate) fn record_success(&mut self) {
        self.current_task = None;
        self.consecutive_failures = 0;
        self.state = SlotState::Idle;
    }

    /// Releases the slot after a failed attempt.
    ///
    /// The slot turns `Unhealthy` once `unhealthy_threshold` consecutive
    /// failures have been seen; the caller is expected to recycle it.
    pub(crate) fn record_failure(&mut self, unhealthy_threshold: u32) {
        self.current_task = None;
        self.consecutive_failures += 1;
        self.state = if self.consecutive_failures >= unhealthy_threshold.max(1) {
            SlotState::Unhealthy
        } else {
            SlotState::Idle
        };
    }

    /// Frees the slot after an attempt that was cut off from outside
    /// (deadline or lost worker). The failure history is left untouched.
    pub(crate) fn release(&mut self) {
        self.current_task = None;
        if self.state == SlotState::Busy {
            self.state = SlotState::Idle;
        }
    }

    /// Starts tearing down an unhealthy slot.
    pub(crate) fn begin_restart(&mut self) {
        self.state = SlotState::Restarting;
    }
}
