//! Operations waiting for their required route.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::route::{OperationError, Route};

/// Work that needs a particular environment to run, such as a sync to the
/// cloud store.
///
/// An operation may be run more than once if an earlier run reported
/// `RouteUnavailable`, so runs must be idempotent.
#[async_trait]
pub trait RoutedOperation: Send + Sync {
    type Output: Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "operation"
    }

    /// Runs the operation on `route`.
    async fn run(&self, route: Route) -> Result<Self::Output, OperationError>;
}

/// Shared handle to a routed operation.
pub type SharedOperation<T> = Arc<dyn RoutedOperation<Output = T>>;

/// A queued operation. Removed only when it has been replayed or expired.
pub struct PendingOperation<T> {
    seq: u64,
    operation: SharedOperation<T>,
    required: Route,
    enqueued: Instant,
    enqueued_at: DateTime<Utc>,
    completion: Option<oneshot::Sender<Result<T, OperationError>>>,
}

impl<T: Send + 'static> PendingOperation<T> {
    /// Creates a pending operation and the ticket its submitter waits on.
    pub(crate) fn new(
        seq: u64,
        operation: SharedOperation<T>,
        required: Route,
    ) -> (Self, PendingTicket<T>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            seq,
            operation,
            required,
            enqueued: Instant::now(),
            enqueued_at: Utc::now(),
            completion: Some(tx),
        };
        let ticket = PendingTicket {
            seq,
            required,
            enqueued_at: pending.enqueued_at,
            rx,
        };
        (pending, ticket)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn required_route(&self) -> Route {
        self.required
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn name(&self) -> &str {
        self.operation.name()
    }

    pub(crate) fn operation(&self) -> SharedOperation<T> {
        Arc::clone(&self.operation)
    }

    pub fn age(&self) -> Duration {
        self.enqueued.elapsed()
    }

    pub fn is_expired(&self, expiry: Duration) -> bool {
        self.age() >= expiry
    }

    /// Delivers the final result to the ticket. Only the first call has an
    /// effect; a dropped ticket is ignored.
    pub(crate) fn complete(&mut self, result: Result<T, OperationError>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}

/// Handle returned for a queued operation.
pub struct PendingTicket<T> {
    seq: u64,
    required: Route,
    enqueued_at: DateTime<Utc>,
    rx: oneshot::Receiver<Result<T, OperationError>>,
}

impl<T> PendingTicket<T> {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn required_route(&self) -> Route {
        self.required
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Waits until the operation is replayed, expires or the router shuts down.
    pub async fn wait(self) -> Result<T, OperationError> {
        self.rx
            .await
            .unwrap_or(Err(OperationError::RouterShutdown))
    }
}

impl<T> std::fmt::Debug for PendingTicket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTicket")
            .field("seq", &self.seq)
            .field("required", &self.required)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Router answer to `execute`.
#[derive(Debug)]
pub enum Dispatch<T> {
    /// The operation ran now.
    Completed(Result<T, OperationError>),
    /// The operation is waiting for its route.
    Queued(PendingTicket<T>),
}

impl<T> Dispatch<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Dispatch::Queued(_))
    }

    /// Waits for the final result whichever way the operation was dispatched.
    pub async fn into_result(self) -> Result<T, OperationError> {
        match self {
            Dispatch::Completed(result) => result,
            Dispatch::Queued(ticket) => ticket.wait().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl RoutedOperation for Noop {
        type Output = u8;

        async fn run(&self, _route: Route) -> Result<u8, OperationError> {
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_completion_delivered_once() {
        let op: SharedOperation<u8> = Arc::new(Noop);
        let (mut pending, ticket) = PendingOperation::new(7, op, Route::CloudOnly);
        assert_eq!(ticket.seq(), 7);
        assert_eq!(pending.required_route(), Route::CloudOnly);

        pending.complete(Ok(5));
        pending.complete(Err(OperationError::RouterShutdown));
        assert_eq!(ticket.wait().await, Ok(5));
    }

    #[tokio::test]
    async fn test_dropped_operation_reads_as_shutdown() {
        let op: SharedOperation<u8> = Arc::new(Noop);
        let (pending, ticket) = PendingOperation::new(1, op, Route::LocalOnly);
        drop(pending);
        assert_eq!(ticket.wait().await, Err(OperationError::RouterShutdown));
    }

    #[test]
    fn test_expiry() {
        let op: SharedOperation<u8> = Arc::new(Noop);
        let (pending, _ticket) = PendingOperation::new(1, op, Route::LocalOnly);
        assert!(pending.is_expired(Duration::ZERO));
        assert!(!pending.is_expired(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_dispatch_into_result() {
        let done: Dispatch<u8> = Dispatch::Completed(Ok(3));
        assert!(!done.is_queued());
        assert_eq!(done.into_result().await, Ok(3));
    }
}
