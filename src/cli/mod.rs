//! Command-line interface for lead-sniper.
//!
//! Provides commands to run the pipeline once or on a schedule, inspect the
//! current route decision, and validate records offline.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
