//! External corroboration: an independent reference signal for a record.
//!
//! The gate never assumes a lookup is fast; it applies its own timeout and
//! treats a missing answer as `Unavailable`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::record::RawRecord;

/// Answer of an external reference source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Corroboration {
    /// The source answered with a confidence between 0 and 1.
    Confirmed { confidence: f64 },
    /// The source could not be asked or did not answer.
    Unavailable { reason: String },
}

impl Corroboration {
    /// Builds a confirmation, clamping the confidence into `[0, 1]`.
    pub fn confirmed(confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Corroboration::Confirmed { confidence }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Corroboration::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Corroboration::Confirmed { .. })
    }
}

/// A lookup against an independent reference (public registry, assessor
/// roll, ...).
#[async_trait]
pub trait Corroborator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Looks the record up. Failures are reported as `Unavailable`, never
    /// as errors.
    async fn lookup(&self, record: &RawRecord) -> Corroboration;
}

/// Used when no reference source is configured. Always unavailable.
#[derive(Debug, Clone, Default)]
pub struct NoCorroboration;

#[async_trait]
impl Corroborator for NoCorroboration {
    fn name(&self) -> &str {
        "none"
    }

    async fn lookup(&self, _record: &RawRecord) -> Corroboration {
        Corroboration::unavailable("no corroboration source configured")
    }
}

#[derive(Debug, Deserialize)]
struct RegistryAnswer {
    confidence: f64,
}

/// Corroborates records against an HTTP registry endpoint.
///
/// The record is POSTed as JSON; the endpoint answers `{"confidence": 0.93}`.
/// Any transport error, non-2xx status or malformed body is `Unavailable`.
#[derive(Debug, Clone)]
pub struct HttpRegistryCorroborator {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRegistryCorroborator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Corroborator for HttpRegistryCorroborator {
    fn name(&self) -> &str {
        "http-registry"
    }

    async fn lookup(&self, record: &RawRecord) -> Corroboration {
        let body = json!({
            "record_id": record.record_id(),
            "source_id": record.source_id,
            "fields": record.fields,
        });

        let response = match self.client.post(&self.endpoint).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Registry lookup failed");
                return Corroboration::unavailable(format!("registry request failed: {}", e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Corroboration::unavailable(format!("registry answered {}", status.as_u16()));
        }

        match response.json::<RegistryAnswer>().await {
            Ok(answer) => Corroboration::confirmed(answer.confidence),
            Err(e) => Corroboration::unavailable(format!("malformed registry answer: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmed_clamps() {
        assert_eq!(
            Corroboration::confirmed(1.7),
            Corroboration::Confirmed { confidence: 1.0 }
        );
        assert_eq!(
            Corroboration::confirmed(f64::NAN),
            Corroboration::Confirmed { confidence: 0.0 }
        );
        assert!(!Corroboration::unavailable("down").is_available());
    }

    #[test]
    fn test_serialization_is_tagged() {
        let json = serde_json::to_value(Corroboration::confirmed(0.5)).expect("serialize");
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["confidence"], 0.5);
    }

    #[tokio::test]
    async fn test_no_corroboration_is_unavailable() {
        let record = RawRecord::new("tax-roll");
        assert!(!NoCorroboration.lookup(&record).await.is_available());
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_unavailable() {
        let corroborator = HttpRegistryCorroborator::new("http://127.0.0.1:9/lookup");
        let record = RawRecord::new("tax-roll").with_field("address", "1 Main St");
        assert!(matches!(
            corroborator.lookup(&record).await,
            Corroboration::Unavailable { .. }
        ));
    }
}
