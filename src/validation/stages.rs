//! The three validation stages.
//!
//! Each stage looks at the record on its own and produces a `StageOutcome`;
//! no stage reads another stage's output. Only the final weighting in
//! `ValidationResult` combines them.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use super::corroboration::Corroboration;
use super::record::{normalize_text, RawRecord, RecordSchema};
use super::result::{Stage, StageOutcome, ValidationError};

/// Default accepted shape of a parcel identifier.
pub const DEFAULT_PARCEL_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9.\-]{2,39}$";

/// Longest record identifier accepted.
const MAX_ID_LEN: usize = 256;

/// Lower bound of the price / estimated value ratio.
const MIN_VALUE_RATIO: f64 = 0.1;

/// Upper bound of the price / estimated value ratio.
const MAX_VALUE_RATIO: f64 = 10.0;

/// Score contributed by the external stage when the reference is unavailable.
pub const NEUTRAL_EXTERNAL_SCORE: f64 = 50.0;

/// Values that mark scraped test or filler data.
const PLACEHOLDER_PATTERN: &str = r"(?i)\b(test|dummy|fake|xxx|placeholder|lorem ipsum)\b";

/// Index of records already accepted in this batch or store.
///
/// The consistency stage consults it for duplicates and contradictions.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    ids: HashSet<String>,
    address_owners: HashMap<String, Option<String>>,
    parcel_owners: HashMap<String, Option<String>>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from previously accepted records.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a RawRecord>) -> Self {
        let mut ctx = Self::new();
        for record in records {
            ctx.insert(record);
        }
        ctx
    }

    /// Adds an accepted record.
    pub fn insert(&mut self, record: &RawRecord) {
        self.ids.insert(record.record_id());
        let owner = record.normalized_owner();
        if let Some(address) = record.normalized_address() {
            self.address_owners.insert(address, owner.clone());
        }
        if let Some(parcel) = record.parcel_id() {
            self.parcel_owners.insert(normalize_text(parcel), owner);
        }
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Stage 1: required fields present, correctly typed and non-empty.
#[derive(Debug, Clone)]
pub struct StructuralCheck {
    schema: RecordSchema,
}

impl StructuralCheck {
    pub fn new(schema: RecordSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Score is the share of passed checks: one for the source id, one per
    /// required field and one per optional field that is present.
    pub fn evaluate(&self, record: &RawRecord) -> StageOutcome {
        let mut passed = 0;
        let mut total = 0;
        let mut findings = Vec::new();

        total += 1;
        if record.source_id.trim().is_empty() {
            findings.push("source id is empty".to_string());
        } else {
            passed += 1;
        }

        for spec in &self.schema.required {
            total += 1;
            match record.get(&spec.name) {
                None => findings.push(format!("missing required field '{}'", spec.name)),
                Some(value) if spec.kind.accepts(value) => passed += 1,
                Some(value) if value.is_null() || value.as_str().is_some_and(|s| s.trim().is_empty()) => {
                    findings.push(format!("required field '{}' is empty", spec.name))
                }
                Some(_) => findings.push(format!(
                    "field '{}' is not a valid {:?}",
                    spec.name, spec.kind
                )),
            }
        }

        for spec in &self.schema.optional {
            let Some(value) = record.get(&spec.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            total += 1;
            if spec.kind.accepts(value) {
                passed += 1;
            } else {
                findings.push(format!(
                    "field '{}' is not a valid {:?}",
                    spec.name, spec.kind
                ));
            }
        }

        StageOutcome::from_checks(Stage::Structural, passed, total, findings)
    }
}

/// Stage 2: identifier formats and agreement with already accepted records.
#[derive(Debug, Clone)]
pub struct ConsistencyCheck {
    parcel_pattern: Regex,
    placeholder: Regex,
}

impl ConsistencyCheck {
    /// # Errors
    ///
    /// Returns `ValidationError::Pattern` if `parcel_pattern` is not a valid regex.
    pub fn new(parcel_pattern: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            parcel_pattern: Regex::new(parcel_pattern)?,
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
        })
    }

    pub fn evaluate(&self, record: &RawRecord, ctx: &ValidationContext) -> StageOutcome {
        let mut checks: Vec<(bool, Option<String>)> = Vec::new();
        let record_id = record.record_id();

        // Identifier format
        let id_ok = !record_id.is_empty()
            && record_id.chars().count() <= MAX_ID_LEN
            && !record_id.chars().any(char::is_control);
        checks.push((id_ok, (!id_ok).then(|| "record id has an invalid format".to_string())));

        if let Some(parcel) = record.parcel_id() {
            let ok = self.parcel_pattern.is_match(parcel);
            checks.push((ok, (!ok).then(|| format!("parcel id '{}' has an invalid format", parcel))));
        }

        // Duplicates of accepted records
        let address = record.normalized_address();
        let duplicate = ctx.contains_id(&record_id)
            || address
                .as_ref()
                .is_some_and(|a| ctx.address_owners.contains_key(a));
        checks.push((
            !duplicate,
            duplicate.then(|| "duplicate of an accepted record".to_string()),
        ));

        // Same property, different owner
        if let Some(owner) = record.normalized_owner() {
            let contradicts = |known: Option<&Option<String>>| {
                matches!(known, Some(Some(known_owner)) if *known_owner != owner)
            };
            let parcel_conflict = record
                .parcel_id()
                .is_some_and(|p| contradicts(ctx.parcel_owners.get(&normalize_text(p))));
            let address_conflict = address
                .as_ref()
                .is_some_and(|a| contradicts(ctx.address_owners.get(a)));
            let ok = !parcel_conflict && !address_conflict;
            checks.push((
                ok,
                (!ok).then(|| "owner contradicts an accepted record for the same property".to_string()),
            ));
        }

        if let (Some(price), Some(estimated)) =
            (record.get_f64("price"), record.get_f64("estimated_value"))
        {
            if estimated != 0.0 {
                let ratio = price / estimated;
                let ok = (MIN_VALUE_RATIO..=MAX_VALUE_RATIO).contains(&ratio);
                checks.push((
                    ok,
                    (!ok).then(|| format!("price to estimated value ratio {:.2} out of range", ratio)),
                ));
            }
        }

        let placeholder = record.fields.iter().find_map(|(key, value)| {
            if key.ends_with("url") {
                return None;
            }
            value
                .as_str()
                .filter(|s| self.placeholder.is_match(s))
                .map(|_| key.clone())
        });
        checks.push((
            placeholder.is_none(),
            placeholder.map(|key| format!("field '{}' holds placeholder data", key)),
        ));

        let total = checks.len();
        let passed = checks.iter().filter(|(ok, _)| *ok).count();
        let findings = checks.into_iter().filter_map(|(_, finding)| finding).collect();
        StageOutcome::from_checks(Stage::Consistency, passed, total, findings)
    }
}

/// Stage 3: turns a corroboration answer into a stage outcome.
///
/// A confirmed confidence `c` scores `100 * c` and passes at `pass_score`.
/// An unavailable reference scores the neutral 50, is marked degraded and
/// does not pass.
pub fn external_outcome(corroboration: &Corroboration, pass_score: f64) -> StageOutcome {
    match corroboration {
        Corroboration::Confirmed { confidence } => {
            let score = (confidence.clamp(0.0, 1.0) * 100.0 * 1e6).round() / 1e6;
            let passed = score >= pass_score;
            let findings = if passed {
                Vec::new()
            } else {
                vec![format!(
                    "reference confidence {:.2} below pass score {}",
                    confidence, pass_score
                )]
            };
            StageOutcome {
                stage: Stage::External,
                score,
                passed,
                degraded: false,
                findings,
            }
        }
        Corroboration::Unavailable { reason } => StageOutcome {
            stage: Stage::External,
            score: NEUTRAL_EXTERNAL_SCORE,
            passed: false,
            degraded: true,
            findings: vec![format!("reference unavailable: {}", reason)],
        },
    }
}
