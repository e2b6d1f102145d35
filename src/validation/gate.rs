//! The validation gate: three independent stages, one weighted verdict.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::corroboration::{Corroboration, Corroborator};
use super::record::{RawRecord, RecordSchema};
use super::result::{StageWeights, ValidationError, ValidationLevel, ValidationResult, Verdict};
use super::stages::{
    external_outcome, ConsistencyCheck, StructuralCheck, ValidationContext, DEFAULT_PARCEL_PATTERN,
};
use crate::metrics::MetricsCollector;

/// Number of corroboration lookups kept in flight during a batch.
const CORROBORATION_CONCURRENCY: usize = 16;

/// Configuration for the validation gate.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Level used when the caller does not pick one.
    pub level: ValidationLevel,
    pub weights: StageWeights,
    /// Width of the band below the pass line classified as borderline.
    pub borderline_margin: f64,
    /// Score at which the external stage counts as passed.
    pub external_pass_score: f64,
    /// Upper bound on a single corroboration lookup.
    pub external_timeout: Duration,
    pub schema: RecordSchema,
    pub parcel_pattern: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            level: ValidationLevel::Standard,
            weights: StageWeights::default(),
            borderline_margin: 15.0,
            external_pass_score: 70.0,
            external_timeout: Duration::from_secs(10),
            schema: RecordSchema::lead(),
            parcel_pattern: DEFAULT_PARCEL_PATTERN.to_string(),
        }
    }
}

impl ValidationConfig {
    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_weights(mut self, weights: StageWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_borderline_margin(mut self, margin: f64) -> Self {
        self.borderline_margin = margin;
        self
    }

    pub fn with_external_pass_score(mut self, score: f64) -> Self {
        self.external_pass_score = score;
        self
    }

    pub fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_parcel_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.parcel_pattern = pattern.into();
        self
    }
}

/// Scores records through the structural, consistency and external stages.
///
/// The gate holds no per-record state: the same record, level, context and
/// corroboration answer always produce the same result.
pub struct ValidationGate {
    config: ValidationConfig,
    structural: StructuralCheck,
    consistency: ConsistencyCheck,
    corroborator: Arc<dyn Corroborator>,
    metrics: MetricsCollector,
}

impl ValidationGate {
    /// Creates a gate.
    ///
    /// # Errors
    ///
    /// Returns an error if the parcel pattern does not compile or a score
    /// setting is out of range.
    pub fn new(
        config: ValidationConfig,
        corroborator: Arc<dyn Corroborator>,
    ) -> Result<Self, ValidationError> {
        if !config.borderline_margin.is_finite() || config.borderline_margin < 0.0 {
            return Err(ValidationError::Setting(format!(
                "borderline margin must be a non-negative number, got {}",
                config.borderline_margin
            )));
        }
        if !(0.0..=100.0).contains(&config.external_pass_score) {
            return Err(ValidationError::Setting(format!(
                "external pass score must be within 0..=100, got {}",
                config.external_pass_score
            )));
        }
        if config.external_timeout.is_zero() {
            return Err(ValidationError::Setting(
                "external timeout must be greater than zero".to_string(),
            ));
        }

        let consistency = ConsistencyCheck::new(&config.parcel_pattern)?;
        let structural = StructuralCheck::new(config.schema.clone());

        info!(
            level = %config.level,
            corroborator = corroborator.name(),
            "Validation gate ready"
        );

        Ok(Self {
            config,
            structural,
            consistency,
            corroborator,
            metrics: MetricsCollector::new(),
        })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Default level of this gate.
    pub fn level(&self) -> ValidationLevel {
        self.config.level
    }

    /// Asks the external reference about a record, bounded by the configured
    /// timeout. A timeout yields `Unavailable`.
    pub async fn corroborate(&self, record: &RawRecord) -> Corroboration {
        match tokio::time::timeout(self.config.external_timeout, self.corroborator.lookup(record))
            .await
        {
            Ok(answer) => answer,
            Err(_) => {
                debug!(
                    corroborator = self.corroborator.name(),
                    timeout_ms = self.config.external_timeout.as_millis() as u64,
                    "Corroboration timed out"
                );
                Corroboration::unavailable(format!(
                    "lookup exceeded {:?}",
                    self.config.external_timeout
                ))
            }
        }
    }

    /// Validates one record against the given context.
    pub async fn evaluate(
        &self,
        record: &RawRecord,
        level: ValidationLevel,
        ctx: &ValidationContext,
    ) -> ValidationResult {
        let corroboration = self.corroborate(record).await;
        self.score(record, level, ctx, &corroboration)
    }

    /// Scores a record with an already obtained corroboration answer.
    ///
    /// Pure: no I/O and no shared state.
    pub fn score(
        &self,
        record: &RawRecord,
        level: ValidationLevel,
        ctx: &ValidationContext,
        corroboration: &Corroboration,
    ) -> ValidationResult {
        let structural = self.structural.evaluate(record);
        let consistency = self.consistency.evaluate(record, ctx);
        let external = external_outcome(corroboration, self.config.external_pass_score);

        ValidationResult::from_stages(
            record.record_id(),
            level,
            structural,
            consistency,
            external,
            self.config.weights,
            self.config.borderline_margin,
        )
    }

    /// Validates records in order, adding each accepted record to `ctx` so
    /// later duplicates in the same batch are caught.
    ///
    /// Lookups run concurrently; scoring stays sequential.
    pub async fn evaluate_batch(
        &self,
        records: &[RawRecord],
        level: ValidationLevel,
        ctx: &mut ValidationContext,
    ) -> Vec<ValidationResult> {
        let answers: Vec<Corroboration> = stream::iter(records)
            .map(|record| self.corroborate(record))
            .buffered(CORROBORATION_CONCURRENCY)
            .boxed()
            .collect()
            .await;

        let mut results = Vec::with_capacity(records.len());
        for (record, corroboration) in records.iter().zip(answers.iter()) {
            let result = self.score(record, level, ctx, corroboration);
            self.metrics
                .record_verdict(result.verdict().as_str(), level.as_str(), result.composite());

            if result.verdict() == Verdict::Accepted {
                ctx.insert(record);
            }
            results.push(result);
        }

        let accepted = results.iter().filter(|r| r.is_accepted()).count();
        let degraded = results.iter().filter(|r| r.is_degraded()).count();
        if degraded > 0 {
            warn!(
                degraded = degraded,
                total = results.len(),
                "Corroboration unavailable for part of the batch"
            );
        }
        info!(
            total = results.len(),
            accepted = accepted,
            level = %level,
            "Batch validated"
        );

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::NoCorroboration;
    use async_trait::async_trait;

    struct FixedCorroborator(f64);

    #[async_trait]
    impl Corroborator for FixedCorroborator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn lookup(&self, _record: &RawRecord) -> Corroboration {
            Corroboration::confirmed(self.0)
        }
    }

    struct SlowCorroborator;

    #[async_trait]
    impl Corroborator for SlowCorroborator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn lookup(&self, _record: &RawRecord) -> Corroboration {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Corroboration::confirmed(1.0)
        }
    }

    fn lead(id: &str, address: &str, owner: &str) -> RawRecord {
        RawRecord::new("tax-roll")
            .with_field("id", id)
            .with_field("address", address)
            .with_field("owner_name", owner)
            .with_field("source_url", "https://county.example.gov/roll/1")
    }

    fn gate(corroborator: Arc<dyn Corroborator>) -> ValidationGate {
        ValidationGate::new(ValidationConfig::default(), corroborator).expect("gate")
    }

    #[tokio::test]
    async fn test_clean_record_accepted() {
        let gate = gate(Arc::new(FixedCorroborator(1.0)));
        let result = gate
            .evaluate(&lead("a-1", "1 Main St", "Ann Lee"), ValidationLevel::Strict, &ValidationContext::new())
            .await;

        assert_eq!(result.composite(), 100.0);
        assert_eq!(result.verdict(), Verdict::Accepted);
        assert!(!result.is_degraded());
    }

    #[test]
    fn test_unavailable_reference_is_borderline_at_standard() {
        let gate = gate(Arc::new(NoCorroboration));
        let record = lead("a-1", "1 Main St", "Ann Lee");
        let result = gate.score(
            &record,
            ValidationLevel::Standard,
            &ValidationContext::new(),
            &Corroboration::unavailable("down"),
        );

        // 100 * 0.40 + 100 * 0.35 + 50 * 0.25
        assert_eq!(result.composite(), 87.5);
        assert_eq!(result.verdict(), Verdict::Borderline);
        assert!(result.is_degraded());

        let relaxed = gate.score(
            &record,
            ValidationLevel::Relaxed,
            &ValidationContext::new(),
            &Corroboration::unavailable("down"),
        );
        assert_eq!(relaxed.verdict(), Verdict::Accepted);
    }

    #[tokio::test]
    async fn test_strict_rejects_acceptance_without_reference() {
        let gate = gate(Arc::new(NoCorroboration));
        let result = gate
            .evaluate(
                &lead("a-1", "1 Main St", "Ann Lee"),
                ValidationLevel::Strict,
                &ValidationContext::new(),
            )
            .await;

        assert!(result.is_degraded());
        assert_eq!(result.verdict(), Verdict::Borderline);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let gate = gate(Arc::new(NoCorroboration));
        let record = lead("a-1", "1 Main St", "Ann Lee").with_field("price", "$1");
        let answer = Corroboration::confirmed(0.8);
        let ctx = ValidationContext::new();

        let first = gate.score(&record, ValidationLevel::Standard, &ctx, &answer);
        let second = gate.score(&record, ValidationLevel::Standard, &ctx, &answer);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_batch_catches_duplicates_within_batch() {
        let gate = gate(Arc::new(FixedCorroborator(0.9)));
        let records = vec![
            lead("a-1", "1 Main St", "Ann Lee"),
            lead("a-2", "1 MAIN ST.", "Ann Lee"),
            lead("a-3", "7 Pine Rd", "Cy Diaz"),
        ];
        let mut ctx = ValidationContext::new();

        let results = gate
            .evaluate_batch(&records, ValidationLevel::Standard, &mut ctx)
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_accepted());
        assert!(!results[1].is_accepted());
        assert!(results[1]
            .consistency()
            .findings
            .iter()
            .any(|f| f.contains("duplicate")));
        assert!(results[2].is_accepted());
        assert_eq!(ctx.len(), 2);
    }

    #[tokio::test]
    async fn test_slow_reference_times_out_as_unavailable() {
        let config = ValidationConfig::default().with_external_timeout(Duration::from_millis(50));
        let gate = ValidationGate::new(config, Arc::new(SlowCorroborator)).expect("gate");

        let result = gate
            .evaluate(&lead("a-1", "1 Main St", "Ann Lee"), ValidationLevel::Standard, &ValidationContext::new())
            .await;

        assert!(result.external().degraded);
        assert_eq!(result.composite(), 87.5);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let corroborator: Arc<dyn Corroborator> = Arc::new(NoCorroboration);
        assert!(ValidationGate::new(
            ValidationConfig::default().with_borderline_margin(-1.0),
            corroborator.clone()
        )
        .is_err());
        assert!(ValidationGate::new(
            ValidationConfig::default().with_external_pass_score(120.0),
            corroborator.clone()
        )
        .is_err());
        assert!(matches!(
            ValidationGate::new(ValidationConfig::default().with_parcel_pattern("(["), corroborator),
            Err(ValidationError::Pattern(_))
        ));
    }
}
