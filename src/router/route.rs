//! Routes, route decisions and the errors routed operations report.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where work can currently run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Both environments are reachable.
    Hybrid,
    /// Only the local environment is reachable.
    LocalOnly,
    /// Only the cloud environment is reachable.
    CloudOnly,
    /// Neither environment is reachable.
    Offline,
}

impl Route {
    /// Every route, in replay order.
    pub const ALL: [Route; 4] = [
        Route::Hybrid,
        Route::LocalOnly,
        Route::CloudOnly,
        Route::Offline,
    ];

    /// Maps the two health signals onto a route.
    ///
    /// | local | cloud | route     |
    /// |-------|-------|-----------|
    /// | yes   | yes   | Hybrid    |
    /// | yes   | no    | LocalOnly |
    /// | no    | yes   | CloudOnly |
    /// | no    | no    | Offline   |
    pub fn from_signals(local_up: bool, cloud_up: bool) -> Self {
        match (local_up, cloud_up) {
            (true, true) => Route::Hybrid,
            (true, false) => Route::LocalOnly,
            (false, true) => Route::CloudOnly,
            (false, false) => Route::Offline,
        }
    }

    /// Returns true if an operation requiring `required` may run on `self`.
    ///
    /// Hybrid satisfies every requirement. An operation that requires
    /// `Offline` needs no environment at all and runs anywhere.
    pub fn satisfies(&self, required: Route) -> bool {
        match required {
            Route::Offline => true,
            Route::Hybrid => *self == Route::Hybrid,
            Route::LocalOnly => matches!(self, Route::Hybrid | Route::LocalOnly),
            Route::CloudOnly => matches!(self, Route::Hybrid | Route::CloudOnly),
        }
    }

    pub fn has_local(&self) -> bool {
        matches!(self, Route::Hybrid | Route::LocalOnly)
    }

    pub fn has_cloud(&self) -> bool {
        matches!(self, Route::Hybrid | Route::CloudOnly)
    }

    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Hybrid => "hybrid",
            Route::LocalOnly => "local_only",
            Route::CloudOnly => "cloud_only",
            Route::Offline => "offline",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    pub local_up: bool,
    pub cloud_up: bool,
    pub decided_at: DateTime<Utc>,
    /// The decision is reused until this instant, then re-probed.
    pub valid_until: DateTime<Utc>,
}

impl RouteDecision {
    /// Builds a decision from fresh signals, valid for `validity`.
    pub fn from_signals(local_up: bool, cloud_up: bool, validity: Duration) -> Self {
        let decided_at = Utc::now();
        let validity = chrono::Duration::from_std(validity).unwrap_or(chrono::Duration::zero());
        Self {
            route: Route::from_signals(local_up, cloud_up),
            local_up,
            cloud_up,
            decided_at,
            valid_until: decided_at + validity,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Errors a routed operation can end with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    /// The operation found its environment down. The router queues it
    /// instead of failing.
    #[error("Route unavailable: {0}")]
    RouteUnavailable(String),

    /// The operation waited longer than the expiry window and was dropped.
    #[error("Operation for route {route} expired after waiting {waited:?}")]
    Expired { route: Route, waited: Duration },

    /// The operation ran and failed for a reason unrelated to routing.
    #[error("Operation failed: {0}")]
    Failed(String),

    /// The router was torn down before the operation could run.
    #[error("Router shut down before the operation ran")]
    RouterShutdown,
}

impl OperationError {
    pub fn is_route_unavailable(&self) -> bool {
        matches!(self, OperationError::RouteUnavailable(_))
    }
}
