//! Validation levels, stage weights, verdicts and the immutable result.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tolerance used when checking that stage weights sum to one.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Errors raised while configuring the validation gate.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Stage weights must sum to 1.0, got {sum}")]
    WeightSum { sum: f64 },

    #[error("Stage weight '{stage}' must be a finite non-negative number, got {value}")]
    InvalidWeight { stage: &'static str, value: f64 },

    #[error("Unknown validation level '{0}' (expected strict, standard or relaxed)")]
    UnknownLevel(String),

    #[error("Invalid parcel id pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid gate setting: {0}")]
    Setting(String),
}

/// How demanding the gate is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Every stage non-degraded and maximal.
    Strict,
    #[default]
    Standard,
    Relaxed,
}

impl ValidationLevel {
    /// Composite score a record needs to be accepted.
    pub fn pass_line(&self) -> f64 {
        match self {
            ValidationLevel::Strict => 100.0,
            ValidationLevel::Standard => 90.0,
            ValidationLevel::Relaxed => 75.0,
        }
    }

    /// Whether acceptance also needs every stage non-degraded and maximal,
    /// whatever its weight.
    pub fn requires_every_stage(&self) -> bool {
        matches!(self, ValidationLevel::Strict)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Strict => "strict",
            ValidationLevel::Standard => "standard",
            ValidationLevel::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ValidationLevel::Strict),
            "standard" => Ok(ValidationLevel::Standard),
            "relaxed" => Ok(ValidationLevel::Relaxed),
            other => Err(ValidationError::UnknownLevel(other.to_string())),
        }
    }
}

/// Overall decision for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accepted,
    /// Below the pass line but above the floor; held for manual review.
    Borderline,
    Rejected,
}

impl Verdict {
    /// Classifies a composite score against a pass line and a borderline floor.
    pub fn classify(composite: f64, pass_line: f64, borderline_floor: f64) -> Self {
        if composite >= pass_line {
            Verdict::Accepted
        } else if composite >= borderline_floor {
            Verdict::Borderline
        } else {
            Verdict::Rejected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Borderline => "borderline",
            Verdict::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three validation stages, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Structural,
    Consistency,
    External,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Structural => "structural",
            Stage::Consistency => "consistency",
            Stage::External => "external",
        }
    }
}

/// Score and findings of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    /// Score between 0 and 100.
    pub score: f64,
    pub passed: bool,
    /// The stage could not run properly and contributed a neutral score.
    pub degraded: bool,
    /// Human-readable reasons for lost points.
    pub findings: Vec<String>,
}

impl StageOutcome {
    /// Builds an outcome from a count of passed checks.
    pub fn from_checks(stage: Stage, passed: usize, total: usize, findings: Vec<String>) -> Self {
        let score = if total == 0 {
            100.0
        } else {
            100.0 * passed as f64 / total as f64
        };
        Self {
            stage,
            score,
            passed: passed == total,
            degraded: false,
            findings,
        }
    }
}

/// Stage weights. Always sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StageWeights {
    structural: f64,
    consistency: f64,
    external: f64,
}

impl StageWeights {
    /// Creates weights, rejecting negative values and sums other than 1.0.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidWeight` or `ValidationError::WeightSum`.
    pub fn new(structural: f64, consistency: f64, external: f64) -> Result<Self, ValidationError> {
        for (stage, value) in [
            ("structural", structural),
            ("consistency", consistency),
            ("external", external),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidWeight { stage, value });
            }
        }

        let sum = structural + consistency + external;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ValidationError::WeightSum { sum });
        }

        Ok(Self {
            structural,
            consistency,
            external,
        })
    }

    pub fn structural(&self) -> f64 {
        self.structural
    }

    pub fn consistency(&self) -> f64 {
        self.consistency
    }

    pub fn external(&self) -> f64 {
        self.external
    }

    pub fn for_stage(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Structural => self.structural,
            Stage::Consistency => self.consistency,
            Stage::External => self.external,
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.structural, self.consistency, self.external]
    }
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            structural: 0.40,
            consistency: 0.35,
            external: 0.25,
        }
    }
}

impl TryFrom<[f64; 3]> for StageWeights {
    type Error = ValidationError;

    fn try_from(weights: [f64; 3]) -> Result<Self, Self::Error> {
        Self::new(weights[0], weights[1], weights[2])
    }
}

/// Float noise absorbed before truncation, far below the reported precision.
const SCORE_NOISE: f64 = 1e-9;

/// Truncates to six decimal places. Float noise never flips a verdict, and a
/// score short of a line is never rounded up onto it.
fn round_score(score: f64) -> f64 {
    ((score + SCORE_NOISE) * 1e6).floor() / 1e6
}

/// Verdict for one record. Immutable; re-validation builds a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    record_id: String,
    level: ValidationLevel,
    structural: StageOutcome,
    consistency: StageOutcome,
    external: StageOutcome,
    weights: StageWeights,
    composite: f64,
    pass_line: f64,
    borderline_floor: f64,
    verdict: Verdict,
}

impl ValidationResult {
    /// Combines three stage outcomes into a composite score and verdict.
    pub(crate) fn from_stages(
        record_id: String,
        level: ValidationLevel,
        structural: StageOutcome,
        consistency: StageOutcome,
        external: StageOutcome,
        weights: StageWeights,
        borderline_margin: f64,
    ) -> Self {
        let composite = round_score(
            structural.score * weights.structural()
                + consistency.score * weights.consistency()
                + external.score * weights.external(),
        );
        let pass_line = level.pass_line();
        let borderline_floor = (pass_line - borderline_margin).max(0.0);
        let mut verdict = Verdict::classify(composite, pass_line, borderline_floor);
        let every_stage_maximal = [&structural, &consistency, &external]
            .iter()
            .all(|stage| !stage.degraded && stage.score >= 100.0);
        if verdict == Verdict::Accepted && level.requires_every_stage() && !every_stage_maximal {
            verdict = Verdict::Borderline;
        }

        Self {
            record_id,
            level,
            structural,
            consistency,
            external,
            weights,
            composite,
            pass_line,
            borderline_floor,
            verdict,
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn level(&self) -> ValidationLevel {
        self.level
    }

    pub fn structural(&self) -> &StageOutcome {
        &self.structural
    }

    pub fn consistency(&self) -> &StageOutcome {
        &self.consistency
    }

    pub fn external(&self) -> &StageOutcome {
        &self.external
    }

    /// Stage outcomes in evaluation order.
    pub fn stages(&self) -> [&StageOutcome; 3] {
        [&self.structural, &self.consistency, &self.external]
    }

    pub fn weights(&self) -> StageWeights {
        self.weights
    }

    pub fn composite(&self) -> f64 {
        self.composite
    }

    pub fn pass_line(&self) -> f64 {
        self.pass_line
    }

    pub fn borderline_floor(&self) -> f64 {
        self.borderline_floor
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }

    /// True if any stage ran degraded.
    pub fn is_degraded(&self) -> bool {
        self.stages().iter().any(|s| s.degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stage: Stage, score: f64, degraded: bool) -> StageOutcome {
        StageOutcome {
            stage,
            score,
            passed: score >= 100.0,
            degraded,
            findings: Vec::new(),
        }
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(StageWeights::new(0.4, 0.35, 0.25).is_ok());
        assert!(matches!(
            StageWeights::new(0.5, 0.35, 0.25),
            Err(ValidationError::WeightSum { .. })
        ));
        assert!(matches!(
            StageWeights::new(1.2, -0.2, 0.0),
            Err(ValidationError::InvalidWeight { stage: "consistency", .. })
        ));
        assert!(StageWeights::try_from([f64::NAN, 0.5, 0.5]).is_err());

        let defaults = StageWeights::default();
        let sum: f64 = defaults.as_array().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_level_pass_lines() {
        assert_eq!(ValidationLevel::Strict.pass_line(), 100.0);
        assert_eq!(ValidationLevel::Standard.pass_line(), 90.0);
        assert_eq!(ValidationLevel::Relaxed.pass_line(), 75.0);
        assert_eq!("RELAXED".parse::<ValidationLevel>().ok(), Some(ValidationLevel::Relaxed));
        assert!("lenient".parse::<ValidationLevel>().is_err());
    }

    #[test]
    fn test_verdict_classification() {
        assert_eq!(Verdict::classify(90.0, 90.0, 75.0), Verdict::Accepted);
        assert_eq!(Verdict::classify(89.9, 90.0, 75.0), Verdict::Borderline);
        assert_eq!(Verdict::classify(75.0, 90.0, 75.0), Verdict::Borderline);
        assert_eq!(Verdict::classify(74.99, 90.0, 75.0), Verdict::Rejected);
    }

    #[test]
    fn test_unavailable_external_is_borderline_under_standard() {
        let result = ValidationResult::from_stages(
            "rec-1".to_string(),
            ValidationLevel::Standard,
            outcome(Stage::Structural, 100.0, false),
            outcome(Stage::Consistency, 100.0, false),
            outcome(Stage::External, 50.0, true),
            StageWeights::default(),
            15.0,
        );

        assert_eq!(result.composite(), 87.5);
        assert_eq!(result.verdict(), Verdict::Borderline);
        assert_eq!(result.borderline_floor(), 75.0);
        assert!(result.is_degraded());
    }

    #[test]
    fn test_strict_requires_perfect_score() {
        let perfect = ValidationResult::from_stages(
            "rec-2".to_string(),
            ValidationLevel::Strict,
            outcome(Stage::Structural, 100.0, false),
            outcome(Stage::Consistency, 100.0, false),
            outcome(Stage::External, 100.0, false),
            StageWeights::default(),
            15.0,
        );
        assert_eq!(perfect.composite(), 100.0);
        assert_eq!(perfect.verdict(), Verdict::Accepted);
        assert!(!perfect.is_degraded());
    }

    #[test]
    fn test_strict_near_perfect_is_not_accepted() {
        let strict = |structural: f64, consistency: f64, external: f64| {
            ValidationResult::from_stages(
                "rec-3".to_string(),
                ValidationLevel::Strict,
                outcome(Stage::Structural, structural, false),
                outcome(Stage::Consistency, consistency, false),
                outcome(Stage::External, external, false),
                StageWeights::default(),
                15.0,
            )
        };

        let near = strict(100.0, 100.0, 96.0);
        assert_eq!(near.composite(), 99.0);
        assert_eq!(near.verdict(), Verdict::Borderline);
        assert_eq!(near.borderline_floor(), 85.0);

        assert_eq!(strict(100.0, 80.0, 80.0).verdict(), Verdict::Borderline);
        assert_eq!(strict(60.0, 100.0, 100.0).composite(), 84.0);
        assert_eq!(strict(60.0, 100.0, 100.0).verdict(), Verdict::Rejected);
    }

    #[test]
    fn test_strict_degraded_never_accepted() {
        let degraded = ValidationResult::from_stages(
            "rec-4".to_string(),
            ValidationLevel::Strict,
            outcome(Stage::Structural, 100.0, false),
            outcome(Stage::Consistency, 100.0, false),
            outcome(Stage::External, 50.0, true),
            StageWeights::default(),
            15.0,
        );
        assert!(degraded.is_degraded());
        assert_eq!(degraded.composite(), 87.5);
        assert_eq!(degraded.verdict(), Verdict::Borderline);

        // Even a weightless external stage cannot lift a degraded record.
        let weights = StageWeights::new(0.5, 0.5, 0.0).expect("weights");
        let unweighted = ValidationResult::from_stages(
            "rec-5".to_string(),
            ValidationLevel::Strict,
            outcome(Stage::Structural, 100.0, false),
            outcome(Stage::Consistency, 100.0, false),
            outcome(Stage::External, 50.0, true),
            weights,
            15.0,
        );
        assert_ne!(unweighted.verdict(), Verdict::Accepted);
    }

    #[test]
    fn test_score_just_below_pass_line_is_not_rounded_up() {
        let result = ValidationResult::from_stages(
            "rec-6".to_string(),
            ValidationLevel::Strict,
            outcome(Stage::Structural, 100.0, false),
            outcome(Stage::Consistency, 100.0, false),
            outcome(Stage::External, 100.0 * 0.999_999_99, false),
            StageWeights::default(),
            15.0,
        );
        assert!(result.composite() < 100.0);
        assert_eq!(result.verdict(), Verdict::Borderline);
    }

    #[test]
    fn test_stage_outcome_from_checks() {
        let outcome = StageOutcome::from_checks(Stage::Structural, 3, 4, vec!["missing x".into()]);
        assert_eq!(outcome.score, 75.0);
        assert!(!outcome.passed);

        let empty = StageOutcome::from_checks(Stage::Consistency, 0, 0, Vec::new());
        assert_eq!(empty.score, 100.0);
        assert!(empty.passed);
    }
}
