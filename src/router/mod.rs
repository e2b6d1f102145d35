//! Hybrid execution routing between the local and cloud environments.
//!
//! This module decides where work runs from live health signals and makes
//! sure work that needs an unavailable environment is held, not lost:
//!
//! - **HealthProbe**: concurrent reachability checks for both environments
//! - **Route / RouteDecision**: the four routing states and a timed decision
//! - **SmartRouter**: runs operations on the current route or queues them
//! - **PendingOperation / PendingTicket**: a queued operation and its handle
//!
//! # Example
//!
//! ```rust,ignore
//! use lead_sniper::router::{RouterConfig, Route, SmartRouter, WritableDirCheck, HttpCheck};
//!
//! let router = SmartRouter::from_checks(
//!     RouterConfig::default(),
//!     Arc::new(WritableDirCheck::new("./data")),
//!     Arc::new(HttpCheck::new("cloud", "https://sync.example.com/health")),
//! );
//!
//! match router.execute(sync_operation, Route::CloudOnly).await {
//!     Dispatch::Completed(result) => println!("synced: {:?}", result),
//!     Dispatch::Queued(ticket) => println!("queued as #{}", ticket.seq()),
//! }
//! ```

pub mod health;
pub mod pending;
pub mod route;
pub mod smart;

pub use health::{
    HealthProbe, HealthSignals, HttpCheck, ManualCheck, ProbeError, ReachabilityCheck,
    WritableDirCheck,
};
pub use pending::{Dispatch, PendingOperation, PendingTicket, RoutedOperation, SharedOperation};
pub use route::{OperationError, Route, RouteDecision};
pub use smart::{ReconcileReport, RouterConfig, SmartRouter};
