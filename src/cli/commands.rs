//! CLI command definitions for lead-sniper.
//!
//! `run` executes one pipeline run, `daemon` keeps running on the configured
//! schedule, `route` shows where work would execute right now and `validate`
//! scores a JSON file of records without fetching or storing anything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{
    PipelineComponents, PipelineConfig, PipelineController, RunReport, TriggerOutcome,
};
use crate::validation::{
    Corroborator, HttpRegistryCorroborator, NoCorroboration, RawRecord, ValidationContext,
    ValidationGate, ValidationLevel,
};

/// Source id given to records read by `validate`.
const VALIDATE_SOURCE_ID: &str = "cli";

/// Lead acquisition orchestrator.
#[derive(Parser, Debug)]
#[command(name = "lead-sniper")]
#[command(about = "Acquire, validate and deliver distressed-property leads")]
#[command(version)]
#[command(
    long_about = "lead-sniper fetches candidate leads from the configured sources, scores them through a three-stage validation gate and delivers accepted leads to the configured store, routing work between the local and cloud environments.\n\nExample usage:\n  lead-sniper --config lead-sniper.yaml run\n  lead-sniper --config lead-sniper.yaml daemon"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file. Environment variables override its values.
    #[arg(short, long, env = "LEAD_SNIPER_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline once and print the run report as JSON.
    Run(RunArgs),

    /// Run the pipeline on a schedule until interrupted.
    Daemon(DaemonArgs),

    /// Probe both environments and print the route decision.
    Route,

    /// Validate records from a JSON file and print the results.
    Validate(ValidateArgs),
}

/// Arguments for `lead-sniper run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Validation level (strict, standard, relaxed). Overrides the configuration.
    #[arg(long)]
    pub level: Option<ValidationLevel>,

    /// Write the report to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print Prometheus metrics after the report.
    #[arg(long)]
    pub print_metrics: bool,
}

/// Arguments for `lead-sniper daemon`.
#[derive(Parser, Debug)]
pub struct DaemonArgs {
    /// Seconds between runs. Overrides `schedule_interval_secs`.
    #[arg(long)]
    pub interval_secs: Option<u64>,
}

/// Arguments for `lead-sniper validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// JSON file holding an array of records.
    pub input: PathBuf,

    /// Validation level (strict, standard, relaxed). Overrides the configuration.
    #[arg(long)]
    pub level: Option<ValidationLevel>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics disabled");
    }

    let config = PipelineConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run(args) => run_once_command(config, args).await,
        Commands::Daemon(args) => run_daemon_command(config, args).await,
        Commands::Route => run_route_command(config).await,
        Commands::Validate(args) => run_validate_command(config, args).await,
    }
}

async fn run_once_command(mut config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(level) = args.level {
        config.validation_level = level;
    }

    let controller = PipelineController::from_config(config)
        .await
        .context("building pipeline")?;
    controller.start();

    let outcome = controller.trigger_pipeline().await;
    let cancelled = controller.shutdown().await;

    if let TriggerOutcome::Completed(mut report) = outcome {
        note_cancelled_writes(&mut report, cancelled);
        write_json(&report, args.output.as_deref())?;
    }
    if args.print_metrics {
        println!("{}", export_metrics());
    }
    Ok(())
}

async fn run_daemon_command(mut config: PipelineConfig, args: DaemonArgs) -> anyhow::Result<()> {
    if let Some(secs) = args.interval_secs {
        config.schedule_interval_secs = secs.max(1);
    }
    let interval = config.schedule_interval();

    let controller = Arc::new(
        PipelineController::from_config(config)
            .await
            .context("building pipeline")?,
    );
    controller.start();

    let stopper = Arc::clone(&controller);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            stopper.shutdown().await;
        }
    });

    info!(interval_secs = interval.as_secs(), "Daemon started");
    let runs = controller.run_schedule(interval).await;
    info!(runs = runs, "Daemon stopped");
    Ok(())
}

async fn run_route_command(config: PipelineConfig) -> anyhow::Result<()> {
    let components = PipelineComponents::from_config(&config)
        .await
        .context("building router")?;
    let decision = components.router.refresh().await;
    write_json(&decision, None)
}

#[derive(Serialize)]
struct ValidateOutput<'a> {
    record_id: &'a str,
    verdict: &'static str,
    composite: f64,
    degraded: bool,
    findings: Vec<&'a str>,
}

async fn run_validate_command(config: PipelineConfig, args: ValidateArgs) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let rows: Vec<Value> =
        serde_json::from_str(&content).context("expected a JSON array of records")?;

    let records: Vec<RawRecord> = rows
        .into_iter()
        .filter_map(|row| RawRecord::from_value(VALIDATE_SOURCE_ID, row))
        .collect();

    let corroborator: Arc<dyn Corroborator> = match &config.registry_url {
        Some(url) => Arc::new(HttpRegistryCorroborator::new(url.clone())),
        None => Arc::new(NoCorroboration),
    };
    let gate = ValidationGate::new(config.validation_config()?, corroborator)?;
    let level = args.level.unwrap_or(config.validation_level);

    let mut ctx = ValidationContext::new();
    let results = gate.evaluate_batch(&records, level, &mut ctx).await;

    let output: Vec<ValidateOutput<'_>> = results
        .iter()
        .map(|result| ValidateOutput {
            record_id: result.record_id(),
            verdict: result.verdict().as_str(),
            composite: result.composite(),
            degraded: result.is_degraded(),
            findings: result
                .stages()
                .into_iter()
                .flat_map(|stage| stage.findings.iter().map(String::as_str))
                .collect(),
        })
        .collect();
    write_json(&output, None)
}

/// A one-shot run tears the router down on exit, so writes still queued for
/// their route are cancelled rather than stored. Records that in the report.
fn note_cancelled_writes(report: &mut RunReport, cancelled: usize) {
    if cancelled == 0 {
        return;
    }
    report.cancelled_writes = report.queued_writes;
    warn!(
        queued_writes = report.queued_writes,
        cancelled_operations = cancelled,
        "Queued writes were cancelled at exit"
    );
    report.errors.push(format!(
        "{} accepted record(s) were queued for an unavailable route and NOT stored; \
         run `lead-sniper daemon` to keep queued writes until the route returns",
        report.queued_writes
    ));
}

fn write_json<T: Serialize>(value: &T, path: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_level() {
        let cli = Cli::try_parse_from(["lead-sniper", "run", "--level", "strict"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.level, Some(ValidationLevel::Strict));
                assert!(!args.print_metrics);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "lead-sniper",
            "daemon",
            "--interval-secs",
            "60",
            "--config",
            "lead-sniper.yaml",
            "-l",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("lead-sniper.yaml")));
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(
            cli.command,
            Commands::Daemon(DaemonArgs { interval_secs: Some(60) })
        ));
    }

    #[test]
    fn test_parse_validate_requires_input() {
        assert!(Cli::try_parse_from(["lead-sniper", "validate"]).is_err());
        let cli = Cli::try_parse_from(["lead-sniper", "validate", "leads.json"]).unwrap();
        match cli.command {
            Commands::Validate(args) => assert_eq!(args.input, PathBuf::from("leads.json")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_writes_are_reported() {
        let mut report = RunReport::begin(uuid::Uuid::new_v4(), crate::router::Route::LocalOnly);
        report.accepted = 3;
        report.queued_writes = 3;

        note_cancelled_writes(&mut report, 0);
        assert_eq!(report.cancelled_writes, 0);
        assert!(report.errors.is_empty());

        note_cancelled_writes(&mut report, 1);
        assert_eq!(report.cancelled_writes, 3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("NOT stored"));
        assert!(report.errors[0].contains("lead-sniper daemon"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cancelled_writes"], 3);
    }

    #[test]
    fn test_invalid_level_rejected() {
        assert!(Cli::try_parse_from(["lead-sniper", "run", "--level", "lenient"]).is_err());
    }
}
