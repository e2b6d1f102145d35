//! Hybrid execution router.
//!
//! `SmartRouter` decides, from live health signals, whether work runs
//! locally, in the cloud, both, or nowhere. Operations whose required route
//! is unavailable are queued per route class and replayed in FIFO order once
//! the route returns. Nothing is dropped silently: every queued operation is
//! eventually replayed, expired or cancelled by `shutdown`, and its ticket
//! learns which.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;

use super::health::{HealthProbe, ReachabilityCheck};
use super::pending::{Dispatch, PendingOperation, PendingTicket, SharedOperation};
use super::route::{OperationError, Route, RouteDecision};

/// Configuration for the router.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// How long a route decision is reused before the environments are re-probed.
    pub probe_interval: Duration,
    /// Maximum time a single reachability check may take.
    pub probe_timeout: Duration,
    /// How long an operation may wait for its route before it is dropped.
    pub pending_operation_expiry: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            pending_operation_expiry: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl RouterConfig {
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_pending_operation_expiry(mut self, expiry: Duration) -> Self {
        self.pending_operation_expiry = expiry;
        self
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Operations replayed that completed successfully.
    pub replayed: usize,
    /// Replays that ended with a non-routing error. The operation stays at
    /// the head of its queue.
    pub failed: usize,
    /// Operations dropped because they waited past the expiry window.
    pub expired: usize,
    /// Operations still waiting after the pass.
    pub remaining: usize,
}

struct RouterState<T> {
    decision: Option<RouteDecision>,
    queues: BTreeMap<Route, VecDeque<PendingOperation<T>>>,
    next_seq: u64,
    closed: bool,
}

/// Chooses the execution route and holds operations that cannot run yet.
pub struct SmartRouter<T> {
    config: RouterConfig,
    probe: HealthProbe,
    state: Mutex<RouterState<T>>,
    // One lane per route class, indexed by `Route as usize`. Dispatch and
    // replay of a class hold its lane so FIFO order holds within the class.
    lanes: [tokio::sync::Mutex<()>; 4],
    expired_total: AtomicU64,
    metrics: MetricsCollector,
}

impl<T: Send + 'static> SmartRouter<T> {
    /// Creates a router around an existing probe.
    pub fn new(config: RouterConfig, probe: HealthProbe) -> Self {
        Self {
            config,
            probe,
            state: Mutex::new(RouterState {
                decision: None,
                queues: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            lanes: std::array::from_fn(|_| tokio::sync::Mutex::new(())),
            expired_total: AtomicU64::new(0),
            metrics: MetricsCollector::new(),
        }
    }

    /// Creates a router probing `local` and `cloud` under the configured timeout.
    pub fn from_checks(
        config: RouterConfig,
        local: Arc<dyn ReachabilityCheck>,
        cloud: Arc<dyn ReachabilityCheck>,
    ) -> Self {
        let probe = HealthProbe::new(local, cloud, config.probe_timeout);
        Self::new(config, probe)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, RouterState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached decision while it is valid, otherwise probes.
    ///
    /// Never fails: unreachable environments simply produce `Offline`.
    pub async fn get_optimal_route(&self) -> RouteDecision {
        if let Some(decision) = self.current_decision() {
            if decision.is_valid() {
                return decision;
            }
        }
        self.refresh().await
    }

    /// Probes both environments now and replaces the cached decision.
    pub async fn refresh(&self) -> RouteDecision {
        let signals = self.probe.probe().await;
        let decision = RouteDecision::from_signals(
            signals.local_up,
            signals.cloud_up,
            self.config.probe_interval,
        );

        let previous = {
            let mut state = self.lock_state();
            state.decision.replace(decision.clone())
        };

        match previous {
            Some(prev) if prev.route == decision.route => {
                debug!(route = %decision.route, "Route unchanged");
            }
            _ if decision.route == Route::Offline => {
                warn!(
                    local_up = decision.local_up,
                    cloud_up = decision.cloud_up,
                    "Both environments unreachable, routing offline"
                );
            }
            previous => {
                info!(
                    from = previous.map(|p| p.route.as_str()).unwrap_or("none"),
                    to = %decision.route,
                    local_up = decision.local_up,
                    cloud_up = decision.cloud_up,
                    "Route changed"
                );
            }
        }
        self.metrics.set_route(decision.route.as_str());

        decision
    }

    /// Last decision, if any probe has run.
    pub fn current_decision(&self) -> Option<RouteDecision> {
        self.lock_state().decision.clone()
    }

    /// Runs `operation` now if the current route satisfies `required`,
    /// otherwise queues it.
    ///
    /// Older operations of the same route class are replayed first, so a new
    /// operation never overtakes them. An operation reporting
    /// `RouteUnavailable` while running is queued rather than failed. The
    /// class lane is held from the backlog check until the operation has
    /// either completed or been queued, so a later submission of the same
    /// class cannot get ahead of it.
    pub async fn execute(&self, operation: SharedOperation<T>, required: Route) -> Dispatch<T> {
        if self.is_closed() {
            return Dispatch::Completed(Err(OperationError::RouterShutdown));
        }

        let _lane = self.lane(required).lock().await;

        let decision = self.get_optimal_route().await;
        if self.has_backlog(required) {
            let expired = self.expire_stale();
            if expired > 0 {
                debug!(expired = expired, "Expired operations before dispatch");
            }
            if decision.route.satisfies(required) {
                let mut report = ReconcileReport::default();
                self.replay_class(required, decision.route, &mut report).await;
            }
        }

        if !decision.route.satisfies(required) || self.has_backlog(required) {
            debug!(
                operation = operation.name(),
                required = %required,
                route = %decision.route,
                "Required route unavailable, queueing operation"
            );
            return self.enqueue(operation, required);
        }

        match operation.run(decision.route).await {
            Err(OperationError::RouteUnavailable(reason)) => {
                warn!(
                    operation = operation.name(),
                    required = %required,
                    reason = %reason,
                    "Operation hit an unavailable route, queueing"
                );
                self.enqueue(operation, required)
            }
            result => Dispatch::Completed(result),
        }
    }

    fn lane(&self, required: Route) -> &tokio::sync::Mutex<()> {
        &self.lanes[required as usize]
    }

    fn enqueue(&self, operation: SharedOperation<T>, required: Route) -> Dispatch<T> {
        let mut state = self.lock_state();
        if state.closed {
            return Dispatch::Completed(Err(OperationError::RouterShutdown));
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let name = operation.name().to_string();
        let (pending, ticket): (PendingOperation<T>, PendingTicket<T>) =
            PendingOperation::new(seq, operation, required);

        let queue = state.queues.entry(required).or_default();
        queue.push_back(pending);
        let depth = queue.len();
        self.metrics.update_pending(required.as_str(), depth);

        info!(
            operation = %name,
            seq = seq,
            required = %required,
            depth = depth,
            "Operation queued until its route is available"
        );
        Dispatch::Queued(ticket)
    }

    fn has_backlog(&self, required: Route) -> bool {
        self.lock_state()
            .queues
            .get(&required)
            .is_some_and(|q| !q.is_empty())
    }

    fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Expires stale operations, then replays each route class in FIFO order
    /// while the current route satisfies it.
    ///
    /// The head of a class is removed only after a successful replay. A
    /// replay that fails, whether with `RouteUnavailable` or any other
    /// error, stays at the head and stops that class until the next pass;
    /// it leaves the queue only by succeeding, expiring or shutdown.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport {
            expired: self.expire_stale(),
            ..Default::default()
        };

        let decision = self.get_optimal_route().await;

        for required in Route::ALL {
            if !decision.route.satisfies(required) {
                continue;
            }
            let _lane = self.lane(required).lock().await;
            self.replay_class(required, decision.route, &mut report).await;
        }

        report.remaining = self.pending_count();
        if report.replayed + report.failed + report.expired > 0 {
            info!(
                replayed = report.replayed,
                failed = report.failed,
                expired = report.expired,
                remaining = report.remaining,
                route = %decision.route,
                "Reconciled pending operations"
            );
        }
        report
    }

    /// Replays the queue of `required` head first. The caller holds the
    /// class lane.
    async fn replay_class(&self, required: Route, route: Route, report: &mut ReconcileReport) {
        loop {
            let head = {
                let state = self.lock_state();
                if state.closed {
                    break;
                }
                state
                    .queues
                    .get(&required)
                    .and_then(|q| q.front())
                    .map(|op| (op.seq(), op.operation()))
            };
            let Some((seq, operation)) = head else {
                break;
            };

            let result = operation.run(route).await;
            match &result {
                Err(OperationError::RouteUnavailable(reason)) => {
                    debug!(
                        operation = operation.name(),
                        seq = seq,
                        reason = %reason,
                        "Replay hit an unavailable route, stopping this class"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        operation = operation.name(),
                        seq = seq,
                        required = %required,
                        error = %e,
                        "Replay failed, keeping the operation queued"
                    );
                    report.failed += 1;
                    break;
                }
                Ok(_) => {}
            }

            let mut state = self.lock_state();
            let Some(queue) = state.queues.get_mut(&required) else {
                break;
            };
            match queue.front() {
                Some(front) if front.seq() == seq => {
                    if let Some(mut done) = queue.pop_front() {
                        done.complete(result);
                    }
                    self.metrics.update_pending(required.as_str(), queue.len());
                    report.replayed += 1;
                    debug!(operation = operation.name(), seq = seq, "Replayed operation");
                }
                // Removed by shutdown or expiry while replaying.
                _ => break,
            }
        }
    }

    /// Drops every operation older than the expiry window. Each ticket
    /// receives `Expired` exactly once.
    fn expire_stale(&self) -> usize {
        let expiry = self.config.pending_operation_expiry;
        let mut expired = 0;
        let mut state = self.lock_state();

        for (route, queue) in state.queues.iter_mut() {
            // Queues are in enqueue order, so stale entries sit at the front.
            while queue.front().is_some_and(|op| op.is_expired(expiry)) {
                if let Some(mut op) = queue.pop_front() {
                    let waited = op.age();
                    warn!(
                        operation = op.name(),
                        seq = op.seq(),
                        required = %route,
                        waited_secs = waited.as_secs(),
                        "Pending operation expired"
                    );
                    op.complete(Err(OperationError::Expired {
                        route: *route,
                        waited,
                    }));
                    expired += 1;
                }
            }
            self.metrics.update_pending(route.as_str(), queue.len());
        }
        drop(state);

        self.expired_total
            .fetch_add(expired as u64, Ordering::SeqCst);
        self.metrics.record_expired(expired);
        expired
    }

    /// Number of operations waiting for a route.
    pub fn pending_count(&self) -> usize {
        self.lock_state().queues.values().map(VecDeque::len).sum()
    }

    /// Waiting operations per required route.
    pub fn pending_by_route(&self) -> BTreeMap<Route, usize> {
        self.lock_state()
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(route, q)| (*route, q.len()))
            .collect()
    }

    /// Total operations expired over the router's lifetime.
    pub fn expired_total(&self) -> u64 {
        self.expired_total.load(Ordering::SeqCst)
    }

    /// Tears the router down. Every waiting operation completes with
    /// `RouterShutdown`; the number of such operations is returned.
    pub fn shutdown(&self) -> usize {
        let mut state = self.lock_state();
        state.closed = true;

        let mut cancelled = 0;
        for (route, queue) in state.queues.iter_mut() {
            for mut op in queue.drain(..) {
                op.complete(Err(OperationError::RouterShutdown));
                cancelled += 1;
            }
            self.metrics.update_pending(route.as_str(), 0);
        }

        if cancelled > 0 {
            warn!(cancelled = cancelled, "Router shut down with pending operations");
        } else {
            info!("Router shut down");
        }
        cancelled
    }

    /// Spawns the background loop that re-probes and reconciles every probe
    /// interval until `shutdown` fires.
    pub fn spawn_reconciler(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        let interval = router.config.probe_interval;

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Reconciler started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Reconciler received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if router.is_closed() {
                            break;
                        }
                        router.refresh().await;
                        router.reconcile().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::health::ManualCheck;
    use crate::router::pending::RoutedOperation;
    use async_trait::async_trait;

    /// Appends its label to a shared log when it runs.
    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl RoutedOperation for Recording {
        type Output = &'static str;

        fn name(&self) -> &str {
            self.label
        }

        async fn run(&self, _route: Route) -> Result<&'static str, OperationError> {
            self.log.lock().expect("log lock").push(self.label);
            Ok(self.label)
        }
    }

    fn recording(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> SharedOperation<&'static str> {
        Arc::new(Recording {
            label,
            log: Arc::clone(log),
        })
    }

    fn router_with(
        local: bool,
        cloud: bool,
        config: RouterConfig,
    ) -> (SmartRouter<&'static str>, Arc<ManualCheck>, Arc<ManualCheck>) {
        let local_check = ManualCheck::new("local", local);
        let cloud_check = ManualCheck::new("cloud", cloud);
        let router = SmartRouter::from_checks(config, local_check.clone(), cloud_check.clone());
        (router, local_check, cloud_check)
    }

    #[tokio::test]
    async fn test_decision_is_cached_within_interval() {
        let (router, _local, cloud) = router_with(true, false, RouterConfig::default());

        assert_eq!(router.get_optimal_route().await.route, Route::LocalOnly);
        cloud.set(true);
        // Still inside the validity window.
        assert_eq!(router.get_optimal_route().await.route, Route::LocalOnly);
        assert_eq!(router.refresh().await.route, Route::Hybrid);
    }

    #[tokio::test]
    async fn test_total_probe_failure_is_offline() {
        let (router, _, _) = router_with(false, false, RouterConfig::default());
        let decision = router.get_optimal_route().await;
        assert_eq!(decision.route, Route::Offline);
        assert!(!decision.local_up && !decision.cloud_up);
    }

    #[tokio::test]
    async fn test_runs_immediately_when_route_satisfied() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (router, _, _) = router_with(true, true, RouterConfig::default());

        let dispatch = router.execute(recording("a", &log), Route::CloudOnly).await;
        assert!(matches!(dispatch, Dispatch::Completed(Ok("a"))));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_queued_operations_replay_in_fifo_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (router, _, cloud) = router_with(true, false, RouterConfig::default());

        let first = router.execute(recording("first", &log), Route::CloudOnly).await;
        let second = router.execute(recording("second", &log), Route::CloudOnly).await;
        assert!(first.is_queued() && second.is_queued());
        assert_eq!(router.pending_count(), 2);
        assert!(log.lock().expect("log").is_empty());

        cloud.set(true);
        router.refresh().await;

        // A new operation of the same class waits for the backlog.
        let third = router.execute(recording("third", &log), Route::CloudOnly).await;
        assert!(matches!(third, Dispatch::Completed(Ok("third"))));
        assert_eq!(*log.lock().expect("log"), vec!["first", "second", "third"]);

        assert_eq!(first.into_result().await, Ok("first"));
        assert_eq!(second.into_result().await, Ok("second"));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_local_operations_unaffected_by_cloud_backlog() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (router, _, _) = router_with(true, false, RouterConfig::default());

        let cloud_op = router.execute(recording("sync", &log), Route::CloudOnly).await;
        let local_op = router.execute(recording("write", &log), Route::LocalOnly).await;

        assert!(cloud_op.is_queued());
        assert!(matches!(local_op, Dispatch::Completed(Ok("write"))));
        assert_eq!(router.pending_by_route().get(&Route::CloudOnly), Some(&1));
    }

    #[tokio::test]
    async fn test_expired_operation_dropped_once_and_never_replayed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = RouterConfig::default().with_pending_operation_expiry(Duration::from_millis(20));
        let (router, _, cloud) = router_with(true, false, config);

        let dispatch = router.execute(recording("stale", &log), Route::CloudOnly).await;
        let Dispatch::Queued(ticket) = dispatch else {
            panic!("operation should be queued");
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        let report = router.reconcile().await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.remaining, 0);
        assert!(matches!(
            ticket.wait().await,
            Err(OperationError::Expired { route: Route::CloudOnly, .. })
        ));

        cloud.set(true);
        router.refresh().await;
        let report = router.reconcile().await;
        assert_eq!(report, ReconcileReport::default());
        assert!(log.lock().expect("log").is_empty());
        assert_eq!(router.expired_total(), 1);
    }

    #[tokio::test]
    async fn test_route_unavailable_during_run_is_queued() {
        struct FlakySync {
            down: AtomicU64,
        }

        #[async_trait]
        impl RoutedOperation for FlakySync {
            type Output = &'static str;

            async fn run(&self, _route: Route) -> Result<&'static str, OperationError> {
                if self.down.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(OperationError::RouteUnavailable("connection refused".into()))
                } else {
                    Ok("synced")
                }
            }
        }

        let (router, _, _) = router_with(true, true, RouterConfig::default());
        let op: SharedOperation<&'static str> = Arc::new(FlakySync {
            down: AtomicU64::new(0),
        });

        let dispatch = router.execute(op, Route::CloudOnly).await;
        assert!(dispatch.is_queued());

        let report = router.reconcile().await;
        assert_eq!(report.replayed, 1);
        assert_eq!(dispatch.into_result().await, Ok("synced"));
    }

    #[tokio::test]
    async fn test_requeued_operation_keeps_its_place() {
        /// Blocks on its first run until released, then reports the route gone.
        struct HeldSync {
            started: Arc<tokio::sync::Notify>,
            release: Arc<tokio::sync::Notify>,
            runs: AtomicU64,
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        #[async_trait]
        impl RoutedOperation for HeldSync {
            type Output = &'static str;

            async fn run(&self, _route: Route) -> Result<&'static str, OperationError> {
                if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    self.started.notify_one();
                    self.release.notified().await;
                    return Err(OperationError::RouteUnavailable("upload dropped".into()));
                }
                self.log.lock().expect("log lock").push("first");
                Ok("first")
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let (router, _, cloud) = router_with(true, true, RouterConfig::default());
        let router = Arc::new(router);
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let held: SharedOperation<&'static str> = Arc::new(HeldSync {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
            runs: AtomicU64::new(0),
            log: Arc::clone(&log),
        });

        let first = tokio::spawn({
            let router = Arc::clone(&router);
            async move { router.execute(held, Route::CloudOnly).await }
        });
        started.notified().await;

        // The cloud drops while the first operation is still running.
        cloud.set(false);
        router.refresh().await;
        let second = tokio::spawn({
            let router = Arc::clone(&router);
            let op = recording("second", &log);
            async move { router.execute(op, Route::CloudOnly).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        let first = first.await.expect("first joins");
        let second = second.await.expect("second joins");
        assert!(first.is_queued() && second.is_queued());

        cloud.set(true);
        router.refresh().await;
        let report = router.reconcile().await;

        assert_eq!(report.replayed, 2);
        assert_eq!(*log.lock().expect("log"), vec!["first", "second"]);
        assert_eq!(first.into_result().await, Ok("first"));
        assert_eq!(second.into_result().await, Ok("second"));
    }

    #[tokio::test]
    async fn test_failed_replay_stays_queued() {
        /// Rejected on its first replay, accepted on the next.
        struct RejectedOnce {
            runs: AtomicU64,
        }

        #[async_trait]
        impl RoutedOperation for RejectedOnce {
            type Output = &'static str;

            async fn run(&self, _route: Route) -> Result<&'static str, OperationError> {
                if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(OperationError::Failed("store rejected".into()))
                } else {
                    Ok("stored")
                }
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let (router, _, cloud) = router_with(true, false, RouterConfig::default());
        let op: SharedOperation<&'static str> = Arc::new(RejectedOnce {
            runs: AtomicU64::new(0),
        });

        let rejected = router.execute(op, Route::CloudOnly).await;
        let behind = router.execute(recording("behind", &log), Route::CloudOnly).await;
        assert!(rejected.is_queued() && behind.is_queued());

        cloud.set(true);
        router.refresh().await;
        let report = router.reconcile().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 2);
        assert!(log.lock().expect("log").is_empty());

        let report = router.reconcile().await;
        assert_eq!(report.replayed, 2);
        assert_eq!(report.remaining, 0);
        assert_eq!(rejected.into_result().await, Ok("stored"));
        assert_eq!(behind.into_result().await, Ok("behind"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (router, _, _) = router_with(false, false, RouterConfig::default());

        let a = router.execute(recording("a", &log), Route::LocalOnly).await;
        let b = router.execute(recording("b", &log), Route::CloudOnly).await;

        assert_eq!(router.shutdown(), 2);
        assert_eq!(router.pending_count(), 0);
        assert_eq!(a.into_result().await, Err(OperationError::RouterShutdown));
        assert_eq!(b.into_result().await, Err(OperationError::RouterShutdown));

        let late = router.execute(recording("late", &log), Route::Offline).await;
        assert!(matches!(late, Dispatch::Completed(Err(OperationError::RouterShutdown))));
    }

    #[tokio::test]
    async fn test_background_reconciler_replays() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = RouterConfig::default().with_probe_interval(Duration::from_millis(20));
        let (router, _, cloud) = router_with(true, false, config);
        let router = Arc::new(router);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = router.spawn_reconciler(shutdown_rx);

        let dispatch = router.execute(recording("sync", &log), Route::CloudOnly).await;
        assert!(dispatch.is_queued());
        cloud.set(true);

        let result = tokio::time::timeout(Duration::from_secs(2), dispatch.into_result())
            .await
            .expect("replayed before timeout");
        assert_eq!(result, Ok("sync"));

        let _ = shutdown_tx.send(());
        handle.await.expect("reconciler joins");
    }
}
