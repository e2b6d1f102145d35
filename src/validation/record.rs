//! Raw scraped records and the schema they are checked against.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Field carrying a record's own identifier, if the source provides one.
pub const ID_FIELD: &str = "id";

/// A single scraped candidate lead.
///
/// The field set depends on the source. Every record carries the source it
/// came from and when it was collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: String,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawRecord {
    /// Creates an empty record collected now.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            collected_at: Utc::now(),
            fields: Map::new(),
        }
    }

    /// Wraps a JSON object produced by a source. Returns `None` for anything
    /// that is not an object.
    pub fn from_value(source_id: impl Into<String>, value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self {
                source_id: source_id.into(),
                collected_at: Utc::now(),
                fields,
            }),
            _ => None,
        }
    }

    pub fn with_collected_at(mut self, collected_at: DateTime<Utc>) -> Self {
        self.collected_at = collected_at;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a string field with surrounding whitespace removed, if it is
    /// present and non-empty.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Returns a numeric field. Strings such as `"$125,000"` are accepted.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(value_as_f64)
    }

    /// Stable identifier of the record.
    ///
    /// Uses the `id` field when the source supplies one, otherwise a SHA-256
    /// digest of the source id and the (key-ordered) fields.
    pub fn record_id(&self) -> String {
        if let Some(id) = self.get_str(ID_FIELD) {
            return id.to_string();
        }
        if let Some(Value::Number(n)) = self.fields.get(ID_FIELD) {
            return n.to_string();
        }

        let mut hasher = Sha256::new();
        hasher.update(self.source_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(Value::Object(self.fields.clone()).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Address normalised for duplicate detection.
    pub fn normalized_address(&self) -> Option<String> {
        self.get_str("address").map(normalize_text)
    }

    /// Owner name normalised for contradiction detection.
    pub fn normalized_owner(&self) -> Option<String> {
        self.get_str("owner_name").map(normalize_text)
    }

    pub fn parcel_id(&self) -> Option<&str> {
        self.get_str("parcel_id")
    }
}

/// Lowercases, drops punctuation and collapses whitespace.
pub fn normalize_text(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| *c != '$' && *c != ',')
                .collect();
            cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

/// Expected type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Non-empty string.
    Text,
    /// JSON number or numeric string.
    Number,
    /// RFC 3339 timestamp or `YYYY-MM-DD` date.
    Date,
    /// JSON array.
    List,
    Bool,
    /// `http://` or `https://` URL.
    Url,
}

impl FieldKind {
    /// Returns true if `value` is a non-null, non-empty value of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::Text => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            FieldKind::Number => value_as_f64(value).is_some(),
            FieldKind::Date => value.as_str().is_some_and(|s| {
                let s = s.trim();
                DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }),
            FieldKind::List => value.is_array(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Url => value.as_str().is_some_and(|s| {
                let s = s.trim();
                (s.starts_with("http://") || s.starts_with("https://")) && s.len() > 8
            }),
        }
    }
}

/// One field of a record schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Fields a record must carry, and optional fields that are type-checked
/// when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub required: Vec<FieldSpec>,
    #[serde(default)]
    pub optional: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Schema for distressed-property leads.
    pub fn lead() -> Self {
        Self {
            required: vec![
                FieldSpec::new("address", FieldKind::Text),
                FieldSpec::new("owner_name", FieldKind::Text),
                FieldSpec::new("source_url", FieldKind::Url),
            ],
            optional: vec![
                FieldSpec::new("parcel_id", FieldKind::Text),
                FieldSpec::new("tax_status", FieldKind::Text),
                FieldSpec::new("distress_indicators", FieldKind::List),
                FieldSpec::new("assessed_value", FieldKind::Number),
                FieldSpec::new("price", FieldKind::Number),
                FieldSpec::new("estimated_value", FieldKind::Number),
                FieldSpec::new("property_type", FieldKind::Text),
                FieldSpec::new("status", FieldKind::Text),
                FieldSpec::new("county", FieldKind::Text),
                FieldSpec::new("state", FieldKind::Text),
                FieldSpec::new("scraped_at", FieldKind::Date),
            ],
        }
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self::lead()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_prefers_source_id_field() {
        let record = RawRecord::new("tax-roll").with_field("id", " APN-001 ");
        assert_eq!(record.record_id(), "APN-001");

        let numeric = RawRecord::new("tax-roll").with_field("id", 42);
        assert_eq!(numeric.record_id(), "42");
    }

    #[test]
    fn test_record_id_hash_is_stable() {
        let a = RawRecord::new("tax-roll")
            .with_field("address", "12 Elm St")
            .with_field("owner_name", "J. Doe");
        let b = RawRecord::new("tax-roll")
            .with_field("owner_name", "J. Doe")
            .with_field("address", "12 Elm St");
        let other_source = RawRecord::new("court")
            .with_field("address", "12 Elm St")
            .with_field("owner_name", "J. Doe");

        assert_eq!(a.record_id(), b.record_id());
        assert_eq!(a.record_id().len(), 64);
        assert_ne!(a.record_id(), other_source.record_id());
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_text("  12 Elm St.,  Springfield "), "12 elm st springfield");
        let record = RawRecord::new("s").with_field("address", "12 ELM ST");
        assert_eq!(record.normalized_address().as_deref(), Some("12 elm st"));
    }

    #[test]
    fn test_numeric_fields() {
        let record = RawRecord::new("s")
            .with_field("price", "$125,000")
            .with_field("estimated_value", 130000.5)
            .with_field("owner_name", "   ");

        assert_eq!(record.get_f64("price"), Some(125000.0));
        assert_eq!(record.get_f64("estimated_value"), Some(130000.5));
        assert_eq!(record.get_str("owner_name"), None);
    }

    #[test]
    fn test_field_kinds() {
        assert!(FieldKind::Text.accepts(&json!("x")));
        assert!(!FieldKind::Text.accepts(&json!("")));
        assert!(!FieldKind::Text.accepts(&Value::Null));
        assert!(FieldKind::Number.accepts(&json!(3)));
        assert!(!FieldKind::Number.accepts(&json!("n/a")));
        assert!(FieldKind::Date.accepts(&json!("2024-03-01")));
        assert!(FieldKind::Date.accepts(&json!("2024-03-01T05:00:00Z")));
        assert!(!FieldKind::Date.accepts(&json!("yesterday")));
        assert!(FieldKind::List.accepts(&json!(["tax_lien"])));
        assert!(FieldKind::Url.accepts(&json!("https://county.gov/roll")));
        assert!(!FieldKind::Url.accepts(&json!("county.gov")));
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(RawRecord::from_value("s", json!({"id": "a"})).is_some());
        assert!(RawRecord::from_value("s", json!(["a"])).is_none());
    }

    #[test]
    fn test_lead_schema() {
        let schema = RecordSchema::lead();
        let required: Vec<_> = schema.required.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(required, vec!["address", "owner_name", "source_url"]);
        assert!(schema.optional.iter().any(|f| f.name == "parcel_id"));
    }
}
