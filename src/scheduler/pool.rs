//! Bounded worker pool executing one batch of tasks.
//!
//! `TaskScheduler::submit` owns the task and slot tables for the lifetime of
//! a batch. Workers are spawned into a `JoinSet`, receive their payload by
//! value and hand it back with a `WorkerReport`; only the coordinating loop
//! mutates scheduler state.
//!
//! # Features
//!
//! - Parallelism bounded by the caller, the configured ceiling and the batch size
//! - Transient failures retried with bounded exponential backoff
//! - Per-attempt timeout and panic isolation
//! - Unhealthy slots recycled after consecutive failures
//! - Batch deadline with cooperative cancellation and partial results

use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::metrics::MetricsCollector;

use super::backoff::BackoffPolicy;
use super::result::{BatchResult, TaskOutcome};
use super::slot::{SlotId, SlotState, WorkerSlot};
use super::task::{Task, TaskState, WorkContext, WorkUnit};

/// Configuration for the task scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Default caller bound on concurrent attempts.
    pub max_parallelism: usize,
    /// Hard upper bound on concurrent attempts regardless of what callers ask for.
    pub parallelism_ceiling: usize,
    /// Total attempts a task may make before it is abandoned.
    pub retry_ceiling: u32,
    /// Consecutive failures after which a slot is recycled.
    pub unhealthy_threshold: u32,
    /// Delay policy between attempts.
    pub backoff: BackoffPolicy,
    /// Maximum time a single attempt may run.
    pub task_timeout: Duration,
    /// Default deadline for a whole batch.
    pub batch_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 100,
            parallelism_ceiling: 256,
            retry_ceiling: 3,
            unhealthy_threshold: 3,
            backoff: BackoffPolicy::default(),
            task_timeout: Duration::from_secs(300),
            batch_deadline: Duration::from_secs(1800), // 30 minutes
        }
    }
}

impl SchedulerConfig {
    /// Sets the default caller bound on concurrency.
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    /// Sets the hard concurrency ceiling.
    pub fn with_parallelism_ceiling(mut self, ceiling: usize) -> Self {
        self.parallelism_ceiling = ceiling;
        self
    }

    /// Sets the total attempt budget per task.
    pub fn with_retry_ceiling(mut self, retry_ceiling: u32) -> Self {
        self.retry_ceiling = retry_ceiling;
        self
    }

    /// Sets the consecutive failure count that makes a slot unhealthy.
    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_threshold = threshold;
        self
    }

    /// Sets the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Sets the default batch deadline.
    pub fn with_batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = deadline;
        self
    }

    /// Number of slots a batch of `task_count` tasks gets.
    ///
    /// A `requested` value of 0 means the caller sets no bound of its own.
    pub fn effective_parallelism(&self, requested: usize, task_count: usize) -> usize {
        let ceiling = self.parallelism_ceiling.max(1);
        let requested = if requested == 0 { ceiling } else { requested };
        requested.min(ceiling).min(task_count).max(1)
    }
}

/// Cumulative statistics across every batch a scheduler has run.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Number of batches that have finished.
    pub batches_completed: u64,
    /// Tasks that ended `Succeeded`.
    pub tasks_succeeded: u64,
    /// Tasks that ended `Abandoned`.
    pub tasks_abandoned: u64,
    /// Attempts started.
    pub attempts: u64,
    /// Slots torn down and replaced.
    pub slots_recycled: u64,
    /// Attempts currently executing.
    pub active_workers: usize,
    /// Average duration of a finished attempt.
    pub average_attempt_duration: Duration,
}

impl SchedulerStats {
    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_succeeded + self.tasks_abandoned;
        if total == 0 {
            return 0.0;
        }
        (self.tasks_succeeded as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking scheduler statistics.
struct SharedSchedulerStats {
    batches_completed: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_abandoned: AtomicU64,
    attempts: AtomicU64,
    finished_attempts: AtomicU64,
    total_attempt_ms: AtomicU64,
    slots_recycled: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedSchedulerStats {
    fn new() -> Self {
        Self {
            batches_completed: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            tasks_abandoned: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            finished_attempts: AtomicU64::new(0),
            total_attempt_ms: AtomicU64::new(0),
            slots_recycled: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_dispatch(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn record_attempt_finished(&self, duration: Duration) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        self.finished_attempts.fetch_add(1, Ordering::SeqCst);
        self.total_attempt_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_attempt_lost(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_stats(&self) -> SchedulerStats {
        let finished = self.finished_attempts.load(Ordering::SeqCst);
        let total_ms = self.total_attempt_ms.load(Ordering::SeqCst);
        let average_attempt_duration = if finished > 0 {
            Duration::from_millis(total_ms / finished)
        } else {
            Duration::ZERO
        };

        SchedulerStats {
            batches_completed: self.batches_completed.load(Ordering::SeqCst),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::SeqCst),
            tasks_abandoned: self.tasks_abandoned.load(Ordering::SeqCst),
            attempts: self.attempts.load(Ordering::SeqCst),
            slots_recycled: self.slots_recycled.load(Ordering::SeqCst),
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            average_attempt_duration,
        }
    }
}

/// What a worker sends back to the coordinator after one attempt.
struct WorkerReport<P, O> {
    task_index: usize,
    slot_index: usize,
    payload: P,
    result: Result<O, TaskError>,
    elapsed: Duration,
}

/// Mutable state of one batch. Owned by the coordinating loop only.
struct BatchRun<P, O> {
    batch_id: Uuid,
    tasks: Vec<Task<P>>,
    outputs: Vec<Option<O>>,
    timed_out: Vec<bool>,
    ready: VecDeque<usize>,
    retries: BinaryHeap<Reverse<(Instant, u64, usize)>>,
    retry_seq: u64,
    slots: Vec<WorkerSlot>,
    idle: VecDeque<usize>,
    // Spawned worker → (task index, slot index), so a worker that dies
    // without reporting can still be traced back to its slot.
    workers: HashMap<Id, (usize, usize)>,
    next_slot_id: u64,
    running: usize,
    peak: usize,
    recycled: u32,
    cancel_tx: watch::Sender<bool>,
    deadline_expired: bool,
}

impl<P, O> BatchRun<P, O> {
    fn new(tasks: Vec<Task<P>>, parallelism: usize) -> Self {
        let count = tasks.len();
        let slots: Vec<WorkerSlot> = (0..parallelism)
            .map(|i| WorkerSlot::fresh(SlotId::new(i as u64)))
            .collect();
        let (cancel_tx, _) = watch::channel(false);

        Self {
            batch_id: Uuid::new_v4(),
            tasks,
            outputs: (0..count).map(|_| None).collect(),
            timed_out: vec![false; count],
            ready: (0..count).collect(),
            retries: BinaryHeap::new(),
            retry_seq: 0,
            slots,
            idle: (0..parallelism).collect(),
            workers: HashMap::new(),
            next_slot_id: parallelism as u64,
            running: 0,
            peak: 0,
            recycled: 0,
            cancel_tx,
            deadline_expired: false,
        }
    }

    fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.state().is_terminal())
    }

    fn next_retry_at(&self) -> Option<Instant> {
        self.retries.peek().map(|Reverse((at, _, _))| *at)
    }

    fn schedule_retry(&mut self, task_index: usize, at: Instant) {
        self.retry_seq += 1;
        self.retries.push(Reverse((at, self.retry_seq, task_index)));
    }

    /// Moves every retry whose backoff has elapsed into the ready queue.
    fn release_due_retries(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, _, task_index))) = self.retries.peek().copied() {
            if at > now {
                break;
            }
            self.retries.pop();
            self.tasks[task_index].mark_ready();
            self.ready.push_back(task_index);
        }
    }

    /// Replaces an unhealthy slot with a fresh one in the same table position.
    fn recycle_slot(&mut self, slot_index: usize) -> SlotId {
        let old = &mut self.slots[slot_index];
        old.begin_restart();
        let old_id = old.id();

        let new_id = SlotId::new(self.next_slot_id);
        self.next_slot_id += 1;
        self.slots[slot_index] = WorkerSlot::fresh(new_id);
        self.recycled += 1;

        info!(
            batch_id = %self.batch_id,
            old_slot = %old_id,
            new_slot = %new_id,
            "Recycled unhealthy worker slot"
        );
        new_id
    }
}

/// Extracts a readable message from a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Executes batches of tasks on a bounded set of worker slots.
pub struct TaskScheduler<W: WorkUnit> {
    config: SchedulerConfig,
    unit: Arc<W>,
    stats: Arc<SharedSchedulerStats>,
    metrics: MetricsCollector,
}

impl<W: WorkUnit> TaskScheduler<W> {
    /// Creates a scheduler running `unit` for every task.
    pub fn new(config: SchedulerConfig, unit: W) -> Self {
        Self::with_unit(config, Arc::new(unit))
    }

    /// Creates a scheduler around a shared work unit.
    pub fn with_unit(config: SchedulerConfig, unit: Arc<W>) -> Self {
        Self {
            config,
            unit,
            stats: Arc::new(SharedSchedulerStats::new()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.to_stats()
    }

    /// Runs `tasks` to completion under the configured batch deadline.
    ///
    /// # Arguments
    ///
    /// * `tasks` - Tasks to execute; outcomes are returned in the same order
    /// * `max_parallelism` - Caller bound on concurrent attempts (0 = no bound)
    pub async fn submit(
        &self,
        tasks: Vec<Task<W::Payload>>,
        max_parallelism: usize,
    ) -> BatchResult<W::Output> {
        self.submit_with_deadline(tasks, max_parallelism, self.config.batch_deadline)
            .await
    }

    /// Runs `tasks` to completion or until `deadline` has passed.
    ///
    /// Every task ends `Succeeded` or `Abandoned`. Tasks still unfinished when
    /// the deadline expires are abandoned with `timed_out` set; their
    /// in-flight attempts see `WorkContext::is_cancelled` and are aborted.
    pub async fn submit_with_deadline(
        &self,
        tasks: Vec<Task<W::Payload>>,
        max_parallelism: usize,
        deadline: Duration,
    ) -> BatchResult<W::Output> {
        let started_at = Utc::now();
        let started = Instant::now();
        let parallelism = self
            .config
            .effective_parallelism(max_parallelism, tasks.len());
        let mut run: BatchRun<W::Payload, W::Output> = BatchRun::new(tasks, parallelism);

        info!(
            batch_id = %run.batch_id,
            tasks = run.tasks.len(),
            parallelism = parallelism,
            deadline_secs = deadline.as_secs_f64(),
            "Starting batch"
        );

        if !run.tasks.is_empty() {
            self.drive(&mut run, started + deadline, deadline).await;
        }

        self.metrics.update_workers(0);
        self.stats.batches_completed.fetch_add(1, Ordering::SeqCst);

        let result = self.finish(run, started_at, started.elapsed());
        info!(
            batch_id = %result.batch_id,
            succeeded = result.succeeded(),
            abandoned = result.abandoned(),
            slots_recycled = result.slots_recycled,
            timed_out = result.timed_out,
            "Batch finished"
        );
        result
    }

    /// Coordinating loop: dispatch, then wait for a report, a due retry or
    /// the deadline, whichever comes first.
    async fn drive(
        &self,
        run: &mut BatchRun<W::Payload, W::Output>,
        deadline_at: Instant,
        deadline: Duration,
    ) {
        let mut in_flight: JoinSet<WorkerReport<W::Payload, W::Output>> = JoinSet::new();

        loop {
            self.dispatch(run, &mut in_flight);

            if run.all_terminal() {
                break;
            }

            if in_flight.is_empty() && run.ready.is_empty() && run.retries.is_empty() {
                self.reap_lost(run);
                continue;
            }

            let next_retry = run.next_retry_at();

            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline_at) => {
                    self.expire(run, &mut in_flight, deadline).await;
                    break;
                }

                Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    match joined {
                        Ok((id, report)) => {
                            run.workers.remove(&id);
                            self.handle_report(run, report);
                        }
                        Err(e) => self.handle_lost(run, e),
                    }
                }

                _ = tokio::time::sleep_until(next_retry.unwrap_or(deadline_at)), if next_retry.is_some() => {
                    run.release_due_retries();
                }
            }
        }
    }

    /// Hands ready tasks to idle slots until one of the two runs out.
    fn dispatch(
        &self,
        run: &mut BatchRun<W::Payload, W::Output>,
        in_flight: &mut JoinSet<WorkerReport<W::Payload, W::Output>>,
    ) {
        while !run.ready.is_empty() && !run.idle.is_empty() {
            let (Some(task_index), Some(slot_index)) = (run.ready.pop_front(), run.idle.pop_front())
            else {
                break;
            };

            let task = &mut run.tasks[task_index];
            let Some(payload) = task.start_attempt() else {
                // Not pending any more; give the slot back.
                run.idle.push_front(slot_index);
                continue;
            };

            let slot = &mut run.slots[slot_index];
            slot.assign(task.id());

            let ctx = WorkContext::new(
                task.id(),
                slot.id(),
                task.attempts(),
                task.worker_class().to_string(),
                run.cancel_tx.subscribe(),
            );

            debug!(
                batch_id = %run.batch_id,
                task_id = %task.id(),
                slot_id = %slot.id(),
                attempt = task.attempts(),
                "Dispatching task"
            );

            let unit = Arc::clone(&self.unit);
            let timeout = self.config.task_timeout;
            let handle = in_flight.spawn(async move {
                let started = Instant::now();
                let attempt = AssertUnwindSafe(unit.execute(&payload, &ctx)).catch_unwind();
                let result = match tokio::time::timeout(timeout, attempt).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => Err(TaskError::transient(format!(
                        "worker panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                    Err(_) => Err(TaskError::transient(format!(
                        "attempt timed out after {:?}",
                        timeout
                    ))),
                };

                WorkerReport {
                    task_index,
                    slot_index,
                    payload,
                    result,
                    elapsed: started.elapsed(),
                }
            });
            run.workers.insert(handle.id(), (task_index, slot_index));

            run.running += 1;
            run.peak = run.peak.max(run.running);
            self.stats.record_dispatch();
            self.metrics.update_workers(run.running);
        }
    }

    /// Applies one worker report to the task and slot tables.
    fn handle_report(
        &self,
        run: &mut BatchRun<W::Payload, W::Output>,
        report: WorkerReport<W::Payload, W::Output>,
    ) {
        let WorkerReport {
            task_index,
            slot_index,
            payload,
            result,
            elapsed,
        } = report;

        run.running = run.running.saturating_sub(1);
        self.stats.record_attempt_finished(elapsed);
        self.metrics.update_workers(run.running);

        let worker_class = run.tasks[task_index].worker_class().to_string();
        self.metrics
            .record_attempt(&worker_class, elapsed.as_secs_f64());
        run.tasks[task_index].return_payload(payload);

        match result {
            Ok(output) => {
                run.slots[slot_index].record_success();
                run.idle.push_back(slot_index);

                let task = &mut run.tasks[task_index];
                task.mark_succeeded();
                run.outputs[task_index] = Some(output);

                self.stats.tasks_succeeded.fetch_add(1, Ordering::SeqCst);
                self.metrics.record_task("succeeded", &worker_class);
                debug!(
                    batch_id = %run.batch_id,
                    task_id = %task.id(),
                    attempts = task.attempts(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Task succeeded"
                );
            }
            Err(error) => {
                run.slots[slot_index].record_failure(self.config.unhealthy_threshold);
                if run.slots[slot_index].state() == SlotState::Unhealthy {
                    run.recycle_slot(slot_index);
                    self.stats.slots_recycled.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_slot_recycled();
                }
                run.idle.push_back(slot_index);

                let retry_ceiling = self.config.retry_ceiling.max(1);
                let task = &mut run.tasks[task_index];
                let task_id = task.id();
                let attempts = task.attempts();

                if error.is_retryable() && attempts < retry_ceiling {
                    let delay = self.config.backoff.delay_for(attempts);
                    debug!(
                        batch_id = %run.batch_id,
                        task_id = %task_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Task attempt failed, will retry"
                    );
                    task.mark_failed(error);
                    if delay.is_zero() {
                        task.mark_ready();
                        run.ready.push_back(task_index);
                    } else {
                        run.schedule_retry(task_index, Instant::now() + delay);
                    }
                } else {
                    warn!(
                        batch_id = %run.batch_id,
                        task_id = %task_id,
                        attempts = attempts,
                        error = %error,
                        "Abandoning task"
                    );
                    task.mark_abandoned(error);
                    self.stats.tasks_abandoned.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_task("abandoned", &worker_class);
                }
            }
        }
    }

    /// Raises cancellation, aborts in-flight attempts and abandons every
    /// task that has not reached a terminal state.
    async fn expire(
        &self,
        run: &mut BatchRun<W::Payload, W::Output>,
        in_flight: &mut JoinSet<WorkerReport<W::Payload, W::Output>>,
        deadline: Duration,
    ) {
        warn!(
            batch_id = %run.batch_id,
            in_flight = in_flight.len(),
            "Batch deadline expired, cancelling remaining tasks"
        );
        run.deadline_expired = true;
        let _ = run.cancel_tx.send(true);
        in_flight.abort_all();

        // Attempts that finished before the abort landed still count.
        while let Some(joined) = in_flight.join_next_with_id().await {
            match joined {
                Ok((id, report)) => {
                    run.workers.remove(&id);
                    self.handle_report(run, report);
                }
                Err(e) => {
                    run.workers.remove(&e.id());
                    run.running = run.running.saturating_sub(1);
                    self.stats.record_attempt_lost();
                }
            }
        }

        run.retries.clear();
        run.ready.clear();
        for slot in run.slots.iter_mut() {
            slot.release();
        }

        for (index, task) in run.tasks.iter_mut().enumerate() {
            if task.state().is_terminal() {
                continue;
            }
            task.mark_abandoned(TaskError::terminal(format!(
                "batch deadline of {:?} expired",
                deadline
            )));
            run.timed_out[index] = true;
            self.stats.tasks_abandoned.fetch_add(1, Ordering::SeqCst);
            self.metrics.record_task("abandoned", task.worker_class());
        }
    }

    /// A worker died without reporting. Its payload is gone, so the task is
    /// abandoned; the slot is replaced and goes back to the idle list.
    fn handle_lost(&self, run: &mut BatchRun<W::Payload, W::Output>, error: JoinError) {
        run.running = run.running.saturating_sub(1);
        self.stats.record_attempt_lost();

        let Some((task_index, slot_index)) = run.workers.remove(&error.id()) else {
            // Untracked; reap_lost abandons the task once nothing else is in flight.
            warn!(batch_id = %run.batch_id, error = %error, "Worker task failed to join");
            return;
        };

        let task = &mut run.tasks[task_index];
        warn!(
            batch_id = %run.batch_id,
            task_id = %task.id(),
            error = %error,
            "Worker lost before reporting, abandoning task"
        );
        task.mark_abandoned(TaskError::terminal(format!(
            "worker lost before reporting: {}",
            error
        )));
        self.stats.tasks_abandoned.fetch_add(1, Ordering::SeqCst);
        self.metrics.record_task("abandoned", task.worker_class());

        run.recycle_slot(slot_index);
        self.stats.slots_recycled.fetch_add(1, Ordering::SeqCst);
        self.metrics.record_slot_recycled();
        run.idle.push_back(slot_index);
    }

    /// Abandons tasks whose worker vanished without a report.
    fn reap_lost(&self, run: &mut BatchRun<W::Payload, W::Output>) {
        for task in run.tasks.iter_mut() {
            if task.state() != TaskState::Running {
                continue;
            }
            warn!(batch_id = %run.batch_id, task_id = %task.id(), "Abandoning task with lost worker");
            let task_id = task.id();
            task.mark_abandoned(TaskError::terminal("worker lost before reporting"));
            self.stats.tasks_abandoned.fetch_add(1, Ordering::SeqCst);
            self.metrics.record_task("abandoned", task.worker_class());

            if let Some(slot_index) = run
                .slots
                .iter()
                .position(|s| s.current_task() == Some(task_id))
            {
                run.slots[slot_index].release();
                run.idle.push_back(slot_index);
            }
        }
        run.running = 0;
    }

    fn finish(
        &self,
        run: BatchRun<W::Payload, W::Output>,
        started_at: chrono::DateTime<Utc>,
        elapsed: Duration,
    ) -> BatchResult<W::Output> {
        let outcomes = run
            .tasks
            .into_iter()
            .zip(run.outputs)
            .zip(run.timed_out)
            .map(|((task, output), timed_out)| TaskOutcome {
                task_id: task.id(),
                worker_class: task.worker_class().to_string(),
                state: task.state(),
                attempts: task.attempts(),
                output,
                error: task.last_error().cloned(),
                timed_out,
            })
            .collect();

        BatchResult {
            batch_id: run.batch_id,
            outcomes,
            slots_recycled: run.recycled,
            slots: run.slots,
            peak_concurrency: run.peak,
            timed_out: run.deadline_expired,
            started_at,
            elapsed,
        }
    }
}
