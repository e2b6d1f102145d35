//! Pipeline control for lead acquisition.
//!
//! The controller owns every long-lived component of a deployment and runs
//! the acquisition flow on demand or on a schedule.
//!
//! # Architecture
//!
//! - **Config**: layered configuration (defaults, YAML file, environment)
//! - **Controller**: run trigger, status, background reconciliation, shutdown
//! - **Report**: per-run report and status snapshot
//!
//! # Pipeline Flow
//!
//! 1. **Reconcile**: writes queued by earlier runs are replayed if their route is back
//! 2. **Route**: the router probes both environments (or reuses a fresh decision)
//! 3. **Fetch**: one scheduler task per source, on the local or cloud worker class
//! 4. **Validate**: every fetched record goes through the three-stage gate
//! 5. **Deliver**: accepted records are written through the router; borderline
//!    ids are listed in the report for manual review
//!
//! # Example
//!
//! ```rust,ignore
//! use lead_sniper::pipeline::{PipelineConfig, PipelineController, TriggerOutcome};
//!
//! let config = PipelineConfig::load(Some(Path::new("lead-sniper.yaml")))?;
//! let controller = PipelineController::from_config(config).await?;
//! controller.start();
//!
//! if let TriggerOutcome::Completed(report) = controller.trigger_pipeline().await {
//!     println!("{} accepted, {} for review", report.accepted, report.borderline);
//! }
//!
//! controller.shutdown().await;
//! ```

pub mod config;
pub mod controller;
pub mod report;

pub use config::{ConfigError, PipelineConfig, ENV_PREFIX};
pub use controller::{PipelineComponents, PipelineController, PipelineError, TriggerOutcome};
pub use report::{PipelineStatus, RunReport};
