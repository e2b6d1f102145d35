//! Parallel task engine: a bounded worker pool with automatic recovery.
//!
//! This module provides the orchestration layer that runs many unreliable
//! work units (one per data source) side by side:
//!
//! - **Task**: an opaque payload plus retry bookkeeping
//! - **WorkerSlot**: an execution context that runs one task at a time
//! - **TaskScheduler**: coordinates a batch over a bounded set of slots
//! - **BackoffPolicy**: delay between attempts of a failing task
//!
//! # Architecture
//!
//! ```text
//!        submit(tasks, K)
//!               │
//!        ┌──────▼───────┐    ready queue (FIFO)
//!        │ coordinator  │◄──────────────────────┐
//!        └──────┬───────┘                       │ backoff elapsed
//!               │ payload by value              │
//!     ┌─────────┼─────────┐               retry heap
//!     ▼         ▼         ▼                     ▲
//! ┌────────┐┌────────┐┌────────┐                │ transient failure
//! │ slot-0 ││ slot-1 ││ slot-K │───── report ───┘
//! └────────┘└────────┘└────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use lead_sniper::scheduler::{SchedulerConfig, Task, TaskScheduler};
//!
//! let scheduler = TaskScheduler::new(SchedulerConfig::default(), fetch_work);
//! let tasks = sources.into_iter().map(Task::new).collect();
//! let result = scheduler.submit(tasks, 100).await;
//! println!("{} of {} sources fetched", result.succeeded(), result.outcomes.len());
//! ```

pub mod backoff;
pub mod pool;
pub mod result;
pub mod slot;
pub mod task;

pub use backoff::BackoffPolicy;
pub use pool::{SchedulerConfig, SchedulerStats, TaskScheduler};
pub use result::{BatchResult, BatchSummary, TaskOutcome};
pub use slot::{SlotId, SlotState, WorkerSlot};
pub use task::{Task, TaskId, TaskState, WorkContext, WorkUnit, DEFAULT_WORKER_CLASS};
