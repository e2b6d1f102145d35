//! Pipeline configuration.
//!
//! Values are resolved in three layers: built-in defaults, an optional YAML
//! file, then `LEAD_SNIPER_*` environment variables. The result is checked
//! by `validate()` before any component is built from it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::router::RouterConfig;
use crate::scheduler::{BackoffPolicy, SchedulerConfig};
use crate::sources::SourceDefinition;
use crate::storage::SinkConfig;
use crate::validation::{StageWeights, ValidationConfig, ValidationLevel, DEFAULT_PARCEL_PATTERN};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "LEAD_SNIPER_";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML.
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration of a lead-sniper deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Scheduler
    /// Upper bound on concurrently running fetch tasks.
    pub max_parallelism: usize,
    /// Hard cap applied to any requested parallelism.
    pub parallelism_ceiling: usize,
    /// Total attempts a task may make.
    pub retry_ceiling: u32,
    /// Consecutive failures after which a worker slot is recycled.
    pub unhealthy_threshold: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub task_timeout_secs: u64,
    pub batch_deadline_secs: u64,

    // Router
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub pending_operation_expiry_secs: u64,
    /// Directory whose writability signals local health.
    pub local_data_dir: PathBuf,
    /// Health endpoint of the cloud environment. Without it the cloud is
    /// considered down.
    pub cloud_health_url: Option<String>,
    /// Endpoint that fetches a source on the cloud side.
    pub cloud_runner_url: Option<String>,

    // Validation
    pub validation_level: ValidationLevel,
    /// Structural, consistency and external weights.
    pub stage_weights: [f64; 3],
    pub borderline_margin: f64,
    pub external_pass_score: f64,
    pub external_timeout_secs: u64,
    pub parcel_pattern: String,
    /// Registry used for external corroboration.
    pub registry_url: Option<String>,

    // Delivery
    pub sink: SinkConfig,
    pub sources: Vec<SourceDefinition>,
    /// Interval between scheduled runs in daemon mode.
    pub schedule_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 100,
            parallelism_ceiling: 256,
            retry_ceiling: 3,
            unhealthy_threshold: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            task_timeout_secs: 300,
            batch_deadline_secs: 1800,

            probe_interval_secs: 30,
            probe_timeout_secs: 5,
            pending_operation_expiry_secs: 6 * 60 * 60,
            local_data_dir: PathBuf::from("./data"),
            cloud_health_url: None,
            cloud_runner_url: None,

            validation_level: ValidationLevel::Standard,
            stage_weights: StageWeights::default().as_array(),
            borderline_margin: 15.0,
            external_pass_score: 70.0,
            external_timeout_secs: 10,
            parcel_pattern: DEFAULT_PARCEL_PATTERN.to_string(),
            registry_url: None,

            sink: SinkConfig::default(),
            sources: Vec::new(),
            schedule_interval_secs: 24 * 60 * 60,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a YAML file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` or `ConfigError::Yaml` if the file cannot be
    /// read or parsed.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Creates configuration from defaults and environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the full layering: defaults, optional file, environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides looked up by `lookup`.
    ///
    /// # Environment Variables
    ///
    /// - `LEAD_SNIPER_MAX_PARALLELISM`, `LEAD_SNIPER_PARALLELISM_CEILING`
    /// - `LEAD_SNIPER_RETRY_CEILING`, `LEAD_SNIPER_UNHEALTHY_THRESHOLD`
    /// - `LEAD_SNIPER_BACKOFF_BASE_MS`, `LEAD_SNIPER_BACKOFF_MAX_MS`
    /// - `LEAD_SNIPER_TASK_TIMEOUT_SECS`, `LEAD_SNIPER_BATCH_DEADLINE_SECS`
    /// - `LEAD_SNIPER_PROBE_INTERVAL_SECS`, `LEAD_SNIPER_PROBE_TIMEOUT_SECS`
    /// - `LEAD_SNIPER_PENDING_EXPIRY_SECS`
    /// - `LEAD_SNIPER_LOCAL_DATA_DIR`, `LEAD_SNIPER_CLOUD_HEALTH_URL`,
    ///   `LEAD_SNIPER_CLOUD_RUNNER_URL`
    /// - `LEAD_SNIPER_VALIDATION_LEVEL` (strict, standard, relaxed)
    /// - `LEAD_SNIPER_STAGE_WEIGHTS` (three comma-separated numbers)
    /// - `LEAD_SNIPER_BORDERLINE_MARGIN`, `LEAD_SNIPER_EXTERNAL_PASS_SCORE`,
    ///   `LEAD_SNIPER_EXTERNAL_TIMEOUT_SECS`, `LEAD_SNIPER_REGISTRY_URL`
    /// - `LEAD_SNIPER_SQLITE_PATH` (selects the SQLite sink),
    ///   `LEAD_SNIPER_SYNC_URL` (selects the HTTP sink)
    /// - `LEAD_SNIPER_SCHEDULE_INTERVAL_SECS`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, val)) = var("MAX_PARALLELISM") {
            self.max_parallelism = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("PARALLELISM_CEILING") {
            self.parallelism_ceiling = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("RETRY_CEILING") {
            self.retry_ceiling = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("UNHEALTHY_THRESHOLD") {
            self.unhealthy_threshold = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("BACKOFF_BASE_MS") {
            self.backoff_base_ms = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("BACKOFF_MAX_MS") {
            self.backoff_max_ms = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("TASK_TIMEOUT_SECS") {
            self.task_timeout_secs = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("BATCH_DEADLINE_SECS") {
            self.batch_deadline_secs = parse_env_value(&val, &key)?;
        }

        if let Some((key, val)) = var("PROBE_INTERVAL_SECS") {
            self.probe_interval_secs = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("PROBE_TIMEOUT_SECS") {
            self.probe_timeout_secs = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("PENDING_EXPIRY_SECS") {
            self.pending_operation_expiry_secs = parse_env_value(&val, &key)?;
        }
        if let Some((_, val)) = var("LOCAL_DATA_DIR") {
            self.local_data_dir = PathBuf::from(val);
        }
        if let Some((_, val)) = var("CLOUD_HEALTH_URL") {
            self.cloud_health_url = non_empty(val);
        }
        if let Some((_, val)) = var("CLOUD_RUNNER_URL") {
            self.cloud_runner_url = non_empty(val);
        }

        if let Some((key, val)) = var("VALIDATION_LEVEL") {
            self.validation_level = val.parse().map_err(|e: crate::validation::ValidationError| {
                ConfigError::InvalidValue {
                    key,
                    message: e.to_string(),
                }
            })?;
        }
        if let Some((key, val)) = var("STAGE_WEIGHTS") {
            let parts: Vec<f64> = val
                .split(',')
                .map(|part| parse_env_value(part.trim(), &key))
                .collect::<Result<_, _>>()?;
            self.stage_weights = <[f64; 3]>::try_from(parts).map_err(|_| ConfigError::InvalidValue {
                key,
                message: "expected three comma-separated weights".to_string(),
            })?;
        }
        if let Some((key, val)) = var("BORDERLINE_MARGIN") {
            self.borderline_margin = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("EXTERNAL_PASS_SCORE") {
            self.external_pass_score = parse_env_value(&val, &key)?;
        }
        if let Some((key, val)) = var("EXTERNAL_TIMEOUT_SECS") {
            self.external_timeout_secs = parse_env_value(&val, &key)?;
        }
        if let Some((_, val)) = var("REGISTRY_URL") {
            self.registry_url = non_empty(val);
        }

        if let Some((_, val)) = var("SQLITE_PATH") {
            self.sink = SinkConfig::Sqlite {
                path: PathBuf::from(val),
            };
        }
        if let Some((_, val)) = var("SYNC_URL") {
            self.sink = SinkConfig::Http { endpoint: val };
        }
        if let Some((key, val)) = var("SCHEDULE_INTERVAL_SECS") {
            self.schedule_interval_secs = parse_env_value(&val, &key)?;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| Err(ConfigError::ValidationFailed(message.to_string()));

        // Scheduler
        if self.max_parallelism == 0 {
            return fail("max_parallelism must be greater than 0");
        }
        if self.parallelism_ceiling == 0 {
            return fail("parallelism_ceiling must be greater than 0");
        }
        if self.retry_ceiling == 0 {
            return fail("retry_ceiling must be greater than 0");
        }
        if self.unhealthy_threshold == 0 {
            return fail("unhealthy_threshold must be greater than 0");
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return fail("backoff_base_ms cannot exceed backoff_max_ms");
        }
        if self.task_timeout_secs == 0 {
            return fail("task_timeout_secs must be greater than 0");
        }
        if self.batch_deadline_secs == 0 {
            return fail("batch_deadline_secs must be greater than 0");
        }

        // Router
        if self.probe_interval_secs == 0 {
            return fail("probe_interval_secs must be greater than 0");
        }
        if self.probe_timeout_secs == 0 {
            return fail("probe_timeout_secs must be greater than 0");
        }
        if self.pending_operation_expiry_secs == 0 {
            return fail("pending_operation_expiry_secs must be greater than 0");
        }

        // Validation
        if let Err(e) = StageWeights::try_from(self.stage_weights) {
            return Err(ConfigError::ValidationFailed(format!("stage_weights: {}", e)));
        }
        if !self.borderline_margin.is_finite() || self.borderline_margin < 0.0 {
            return fail("borderline_margin must be a non-negative number");
        }
        if !(0.0..=100.0).contains(&self.external_pass_score) {
            return fail("external_pass_score must be between 0 and 100");
        }
        if self.external_timeout_secs == 0 {
            return fail("external_timeout_secs must be greater than 0");
        }
        if let Err(e) = regex::Regex::new(&self.parcel_pattern) {
            return Err(ConfigError::ValidationFailed(format!("parcel_pattern: {}", e)));
        }

        // Delivery
        if self.schedule_interval_secs == 0 {
            return fail("schedule_interval_secs must be greater than 0");
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return fail("source ids cannot be empty");
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
        }

        Ok(())
    }

    /// Builder method to set max parallelism.
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max;
        self
    }

    /// Builder method to set the retry ceiling.
    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    /// Builder method to set the backoff bounds.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn with_batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline_secs = deadline.as_secs();
        self
    }

    pub fn with_pending_operation_expiry(mut self, expiry: Duration) -> Self {
        self.pending_operation_expiry_secs = expiry.as_secs();
        self
    }

    pub fn with_validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }

    pub fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_local_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_data_dir = dir.into();
        self
    }

    pub fn with_cloud_health_url(mut self, url: impl Into<String>) -> Self {
        self.cloud_health_url = Some(url.into());
        self
    }

    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = Some(url.into());
        self
    }

    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceDefinition>) -> Self {
        self.sources = sources;
        self
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    /// Scheduler settings derived from this configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_max_parallelism(self.max_parallelism)
            .with_parallelism_ceiling(self.parallelism_ceiling)
            .with_retry_ceiling(self.retry_ceiling)
            .with_unhealthy_threshold(self.unhealthy_threshold)
            .with_backoff(BackoffPolicy::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            ))
            .with_task_timeout(Duration::from_secs(self.task_timeout_secs))
            .with_batch_deadline(Duration::from_secs(self.batch_deadline_secs))
    }

    /// Router settings derived from this configuration.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::default()
            .with_probe_interval(Duration::from_secs(self.probe_interval_secs))
            .with_probe_timeout(Duration::from_secs(self.probe_timeout_secs))
            .with_pending_operation_expiry(Duration::from_secs(self.pending_operation_expiry_secs))
    }

    /// Validation gate settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if the stage weights are invalid.
    pub fn validation_config(&self) -> Result<ValidationConfig, ConfigError> {
        let weights = StageWeights::try_from(self.stage_weights)
            .map_err(|e| ConfigError::ValidationFailed(format!("stage_weights: {}", e)))?;
        Ok(ValidationConfig::default()
            .with_level(self.validation_level)
            .with_weights(weights)
            .with_borderline_margin(self.borderline_margin)
            .with_external_pass_score(self.external_pass_score)
            .with_external_timeout(Duration::from_secs(self.external_timeout_secs))
            .with_parcel_pattern(self.parcel_pattern.clone()))
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_parallelism, 100);
        assert_eq!(config.parallelism_ceiling, 256);
        assert_eq!(config.retry_ceiling, 3);
        assert_eq!(config.unhealthy_threshold, 3);
        assert_eq!(config.probe_interval_secs, 30);
        assert_eq!(config.pending_operation_expiry_secs, 21_600);
        assert_eq!(config.validation_level, ValidationLevel::Standard);
        assert_eq!(config.stage_weights, [0.40, 0.35, 0.25]);
        assert!((config.borderline_margin - 15.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lead-sniper.yaml");
        std::fs::write(
            &path,
            r#"
max_parallelism: 12
validation_level: relaxed
sink:
  kind: memory
sources:
  - id: seed
    kind: inline
    records:
      - { id: "a" }
"#,
        )
        .unwrap();

        let config = PipelineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.max_parallelism, 12);
        assert_eq!(config.validation_level, ValidationLevel::Relaxed);
        assert_eq!(config.sink, SinkConfig::Memory);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.retry_ceiling, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::default();
        config
            .apply_env(lookup(&[
                ("LEAD_SNIPER_MAX_PARALLELISM", "8"),
                ("LEAD_SNIPER_VALIDATION_LEVEL", "strict"),
                ("LEAD_SNIPER_STAGE_WEIGHTS", "0.5, 0.3, 0.2"),
                ("LEAD_SNIPER_SQLITE_PATH", "/tmp/leads.db"),
                ("LEAD_SNIPER_CLOUD_HEALTH_URL", "  "),
            ]))
            .unwrap();

        assert_eq!(config.max_parallelism, 8);
        assert_eq!(config.validation_level, ValidationLevel::Strict);
        assert_eq!(config.stage_weights, [0.5, 0.3, 0.2]);
        assert_eq!(
            config.sink,
            SinkConfig::Sqlite {
                path: PathBuf::from("/tmp/leads.db")
            }
        );
        assert_eq!(config.cloud_health_url, None);
    }

    #[test]
    fn test_env_invalid_values() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(lookup(&[("LEAD_SNIPER_RETRY_CEILING", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("LEAD_SNIPER_RETRY_CEILING"));

        let err = config
            .apply_env(lookup(&[("LEAD_SNIPER_STAGE_WEIGHTS", "0.5,0.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("three"));

        let err = config
            .apply_env(lookup(&[("LEAD_SNIPER_VALIDATION_LEVEL", "lenient")]))
            .unwrap_err();
        assert!(err.to_string().contains("lenient"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            (PipelineConfig::default().with_max_parallelism(0), "max_parallelism"),
            (PipelineConfig::default().with_retry_ceiling(0), "retry_ceiling"),
            (
                PipelineConfig::default().with_backoff(Duration::from_secs(60), Duration::from_secs(1)),
                "backoff_base_ms",
            ),
            (
                PipelineConfig {
                    stage_weights: [0.5, 0.5, 0.5],
                    ..Default::default()
                },
                "stage_weights",
            ),
            (
                PipelineConfig {
                    parcel_pattern: "([".to_string(),
                    ..Default::default()
                },
                "parcel_pattern",
            ),
        ];

        for (config, needle) in cases {
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(needle), "{} not in {}", needle, err);
        }
    }

    #[test]
    fn test_validation_rejects_duplicate_sources() {
        use crate::sources::SourceAdapter;

        let source = SourceDefinition::new("seed", SourceAdapter::Inline { records: vec![] });
        let config = PipelineConfig::default().with_sources(vec![source.clone(), source]);
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_component_configs() {
        let config = PipelineConfig::default()
            .with_backoff(Duration::from_millis(100), Duration::from_secs(2))
            .with_pending_operation_expiry(Duration::from_secs(60));

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.max_parallelism, 100);
        assert_eq!(scheduler.backoff.base_delay, Duration::from_millis(100));
        assert_eq!(scheduler.task_timeout, Duration::from_secs(300));

        let router = config.router_config();
        assert_eq!(router.pending_operation_expiry, Duration::from_secs(60));

        let validation = config.validation_config().unwrap();
        assert_eq!(validation.level, ValidationLevel::Standard);
        assert_eq!(validation.external_timeout, Duration::from_secs(10));
    }
}
