//! Three-stage validation of scraped lead records.
//!
//! Every record goes through three independent stages whose scores are
//! combined with fixed weights into a composite score and a verdict:
//!
//! ```text
//!   RawRecord ──┬── StructuralCheck ──── required fields, types    (0.40)
//!               ├── ConsistencyCheck ─── formats, duplicates,      (0.35)
//!               │                        contradictions, ratios
//!               └── Corroborator ─────── independent reference     (0.25)
//!                                 │
//!                                 ▼
//!                  composite ≥ pass line        → Accepted
//!                  composite ≥ pass − margin    → Borderline
//!                  otherwise                    → Rejected
//! ```
//!
//! An unavailable reference never blocks validation: the external stage
//! contributes a neutral score and the result is marked degraded.

pub mod corroboration;
pub mod gate;
pub mod record;
pub mod result;
pub mod stages;

pub use corroboration::{Corroboration, Corroborator, HttpRegistryCorroborator, NoCorroboration};
pub use gate::{ValidationConfig, ValidationGate};
pub use record::{normalize_text, FieldKind, FieldSpec, RawRecord, RecordSchema, ID_FIELD};
pub use result::{
    Stage, StageOutcome, StageWeights, ValidationError, ValidationLevel, ValidationResult,
    Verdict,
};
pub use stages::{
    external_outcome, ConsistencyCheck, StructuralCheck, ValidationContext,
    DEFAULT_PARCEL_PATTERN, NEUTRAL_EXTERNAL_SCORE,
};
