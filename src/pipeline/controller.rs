//! Pipeline controller: one entry point tying the components together.
//!
//! A run fetches every configured source through the scheduler, validates
//! the records through the gate and hands the accepted ones to the store
//! through the router:
//!
//! ```text
//! trigger_pipeline
//!   ├─ router.reconcile()          replay writes queued by earlier runs
//!   ├─ router.get_optimal_route()  Offline → defer every source
//!   ├─ scheduler.submit(fetches)   one task per source
//!   ├─ gate.evaluate_batch()       accepted / borderline / rejected
//!   └─ router.execute(write)       stored now, or queued until the route returns
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::router::{
    Dispatch, HealthProbe, HttpCheck, ManualCheck, ReachabilityCheck, Route, RoutedOperation,
    SmartRouter, WritableDirCheck,
};
use crate::scheduler::{BatchSummary, Task, TaskScheduler};
use crate::sources::{
    FetchRequest, FetchWork, SourceRegistry, CLOUD_WORKER_CLASS, LOCAL_WORKER_CLASS,
};
use crate::storage::{AcceptedRecord, RecordStore, StoreWrite, WriteReceipt};
use crate::validation::{
    Corroborator, HttpRegistryCorroborator, NoCorroboration, ValidationContext, ValidationError,
    ValidationGate, Verdict,
};

use super::config::{ConfigError, PipelineConfig};
use super::report::{PipelineStatus, RunReport};

/// Errors that can occur while setting up the pipeline.
///
/// Once built, runs never fail: problems are collected in the run report.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The validation gate could not be built.
    #[error("Validation setup error: {0}")]
    Validation(#[from] ValidationError),

    /// The record store could not be opened.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Answer to `trigger_pipeline`.
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    /// The run finished; here is its report.
    Completed(RunReport),
    /// Another run is in progress; no new run was started.
    AlreadyRunning(Uuid),
}

impl TriggerOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            TriggerOutcome::Completed(report) => Some(report),
            TriggerOutcome::AlreadyRunning(_) => None,
        }
    }
}

/// The collaborators a controller is built from.
pub struct PipelineComponents {
    pub sources: Arc<SourceRegistry>,
    pub store: Arc<dyn RecordStore>,
    pub router: Arc<SmartRouter<WriteReceipt>>,
    pub corroborator: Arc<dyn Corroborator>,
}

impl PipelineComponents {
    /// Builds the production collaborators described by `config`.
    ///
    /// Local health is the writability of `local_data_dir`; cloud health is
    /// a GET on `cloud_health_url` (down when unset).
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let sources = Arc::new(SourceRegistry::new(config.sources.clone()));
        let store = config.sink.build().await?;

        let local: Arc<dyn ReachabilityCheck> =
            Arc::new(WritableDirCheck::new(config.local_data_dir.clone()));
        let cloud: Arc<dyn ReachabilityCheck> = match &config.cloud_health_url {
            Some(url) => Arc::new(HttpCheck::new("cloud", url.clone())),
            None => ManualCheck::new("cloud", false),
        };
        let router_config = config.router_config();
        let probe = HealthProbe::new(local, cloud, router_config.probe_timeout);
        let router = Arc::new(SmartRouter::new(router_config, probe));

        let corroborator: Arc<dyn Corroborator> = match &config.registry_url {
            Some(url) => Arc::new(HttpRegistryCorroborator::new(url.clone())),
            None => Arc::new(NoCorroboration),
        };

        Ok(Self {
            sources,
            store,
            router,
            corroborator,
        })
    }
}

/// Clears the active run marker when a run ends, however it ends.
struct ActiveRunGuard<'a> {
    slot: &'a Mutex<Option<Uuid>>,
}

impl Drop for ActiveRunGuard<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives pipeline runs and exposes their status.
pub struct PipelineController {
    config: PipelineConfig,
    scheduler: TaskScheduler<FetchWork>,
    router: Arc<SmartRouter<WriteReceipt>>,
    gate: ValidationGate,
    sources: Arc<SourceRegistry>,
    store: Arc<dyn RecordStore>,
    context: tokio::sync::Mutex<ValidationContext>,
    context_seeded: AtomicBool,
    active_run: Mutex<Option<Uuid>>,
    last_run: Mutex<Option<RunReport>>,
    last_batch: Mutex<Option<BatchSummary>>,
    runs_completed: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineController {
    /// Builds a controller and its production collaborators from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid, the store
    /// cannot be opened or the gate cannot be built.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let components = PipelineComponents::from_config(&config).await?;
        Self::new(config, components)
    }

    /// Builds a controller around the given collaborators.
    pub fn new(
        config: PipelineConfig,
        components: PipelineComponents,
    ) -> Result<Self, PipelineError> {
        let gate = ValidationGate::new(config.validation_config()?, components.corroborator)?;
        let work = FetchWork::new(components.sources.clone(), config.cloud_runner_url.clone());
        let scheduler = TaskScheduler::new(config.scheduler_config(), work);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            scheduler,
            router: components.router,
            gate,
            sources: components.sources,
            store: components.store,
            context: tokio::sync::Mutex::new(ValidationContext::new()),
            context_seeded: AtomicBool::new(false),
            active_run: Mutex::new(None),
            last_run: Mutex::new(None),
            last_batch: Mutex::new(None),
            runs_completed: AtomicU64::new(0),
            shutdown_tx,
            reconciler: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<SmartRouter<WriteReceipt>> {
        &self.router
    }

    /// Starts the background reconciler. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut reconciler = lock(&self.reconciler);
        if reconciler.is_none() {
            *reconciler = Some(self.router.spawn_reconciler(self.shutdown_tx.subscribe()));
            info!(
                sources = self.sources.len(),
                sink = self.store.name(),
                "Pipeline controller started"
            );
        }
    }

    /// Stops background work and tears the router down.
    ///
    /// Returns the number of queued operations cancelled.
    pub async fn shutdown(&self) -> usize {
        let _ = self.shutdown_tx.send(());
        let handle = lock(&self.reconciler).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Reconciler ended abnormally");
            }
        }
        let cancelled = self.router.shutdown();
        info!(cancelled = cancelled, "Pipeline controller stopped");
        cancelled
    }

    /// Runs the pipeline once.
    ///
    /// If a run is already in progress no new run starts and its id is
    /// returned instead.
    pub async fn trigger_pipeline(&self) -> TriggerOutcome {
        let run_id = {
            let mut active = lock(&self.active_run);
            if let Some(run_id) = *active {
                info!(run_id = %run_id, "Run already in progress");
                return TriggerOutcome::AlreadyRunning(run_id);
            }
            let run_id = Uuid::new_v4();
            *active = Some(run_id);
            run_id
        };
        let _guard = ActiveRunGuard {
            slot: &self.active_run,
        };

        let report = self.run(run_id).await;

        *lock(&self.last_run) = Some(report.clone());
        self.runs_completed.fetch_add(1, Ordering::SeqCst);
        TriggerOutcome::Completed(report)
    }

    /// Triggers a run now and then every `interval` until shutdown.
    ///
    /// Returns the number of runs completed.
    pub async fn run_schedule(&self, interval: Duration) -> u64 {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut runs = 0;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(runs = runs, "Schedule stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let TriggerOutcome::Completed(report) = self.trigger_pipeline().await {
                        runs += 1;
                        info!(
                            run_id = %report.run_id,
                            next_in_secs = interval.as_secs(),
                            "Scheduled run finished"
                        );
                    }
                }
            }
        }
        runs
    }

    /// Current state of the controller.
    pub fn get_status(&self) -> PipelineStatus {
        PipelineStatus {
            active_run: *lock(&self.active_run),
            decision: self.router.current_decision(),
            pending_operations: self.router.pending_count(),
            pending_by_route: self.router.pending_by_route(),
            expired_operations: self.router.expired_total(),
            last_batch: lock(&self.last_batch).clone(),
            last_run: lock(&self.last_run).clone(),
            runs_completed: self.runs_completed.load(Ordering::SeqCst),
        }
    }

    async fn run(&self, run_id: Uuid) -> RunReport {
        let replay = self.router.reconcile().await;
        if replay.replayed + replay.expired > 0 {
            info!(
                run_id = %run_id,
                replayed = replay.replayed,
                expired = replay.expired,
                "Replayed queued writes"
            );
        }

        let decision = self.router.get_optimal_route().await;
        let mut report = RunReport::begin(run_id, decision.route);
        info!(
            run_id = %run_id,
            route = %decision.route,
            sources = self.sources.len(),
            "Run started"
        );

        let source_ids = self.sources.ids();
        if decision.route == Route::Offline {
            warn!(run_id = %run_id, "No environment reachable, deferring every source");
            report.deferred_sources = source_ids;
            report
                .errors
                .push("no execution environment reachable".to_string());
            report.finished_at = Utc::now();
            return report;
        }

        // Fetch
        let worker_class = if decision.route.has_local() {
            LOCAL_WORKER_CLASS
        } else {
            CLOUD_WORKER_CLASS
        };
        let tasks: Vec<_> = source_ids
            .iter()
            .map(|id| Task::new(FetchRequest::new(id.clone())).with_worker_class(worker_class))
            .collect();
        let batch = self.scheduler.submit(tasks, self.config.max_parallelism).await;

        let summary = batch.summary();
        *lock(&self.last_batch) = Some(summary.clone());
        report.batch = Some(summary);

        let mut records = Vec::new();
        for (source_id, outcome) in source_ids.iter().zip(batch.outcomes) {
            match outcome.output {
                Some(fetched) => records.extend(fetched),
                None => {
                    let reason = outcome
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no output".to_string());
                    report.errors.push(format!(
                        "source '{}' abandoned after {} attempt(s): {}",
                        source_id, outcome.attempts, reason
                    ));
                }
            }
        }
        report.scraped = records.len();

        // Validate
        let results = {
            let mut ctx = self.context.lock().await;
            if !self.context_seeded.load(Ordering::SeqCst) {
                match self.store.stored_records().await {
                    Ok(stored) => {
                        for record in &stored {
                            ctx.insert(record);
                        }
                        self.context_seeded.store(true, Ordering::SeqCst);
                    }
                    Err(e) => report
                        .errors
                        .push(format!("could not seed duplicate detection: {}", e)),
                }
            }
            self.gate
                .evaluate_batch(&records, self.config.validation_level, &mut ctx)
                .await
        };

        let mut accepted = Vec::new();
        for (record, result) in records.into_iter().zip(results.iter()) {
            if result.is_degraded() {
                report.degraded += 1;
            }
            match result.verdict() {
                Verdict::Accepted => accepted.push(AcceptedRecord::new(record, result)),
                Verdict::Borderline => report.borderline_ids.push(result.record_id().to_string()),
                Verdict::Rejected => report.rejected += 1,
            }
        }
        report.accepted = accepted.len();
        report.borderline = report.borderline_ids.len();

        // Deliver
        if !accepted.is_empty() {
            let count = accepted.len();
            let write: Arc<dyn RoutedOperation<Output = WriteReceipt>> =
                Arc::new(StoreWrite::new(self.store.clone(), accepted));

            match self.router.execute(write, self.store.required_route()).await {
                Dispatch::Completed(Ok(receipt)) => {
                    report.stored = receipt.written;
                    report.duplicates = receipt.duplicates;
                }
                Dispatch::Completed(Err(e)) => {
                    error!(run_id = %run_id, error = %e, "Store write failed");
                    report.errors.push(format!("store write failed: {}", e));
                }
                Dispatch::Queued(ticket) => {
                    report.queued_writes = count;
                    let seq = ticket.seq();
                    tokio::spawn(async move {
                        match ticket.wait().await {
                            Ok(receipt) => info!(
                                seq = seq,
                                written = receipt.written,
                                "Queued write delivered"
                            ),
                            Err(e) => warn!(seq = seq, error = %e, "Queued write not delivered"),
                        }
                    });
                }
            }
        }

        report.finished_at = Utc::now();
        info!(
            run_id = %run_id,
            route = %report.route,
            scraped = report.scraped,
            accepted = report.accepted,
            borderline = report.borderline,
            rejected = report.rejected,
            stored = report.stored,
            queued_writes = report.queued_writes,
            duration_ms = report.duration_ms(),
            "Run finished"
        );
        report
    }
}
