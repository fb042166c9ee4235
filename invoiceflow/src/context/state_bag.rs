//! The run's accumulating state bag.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::core::{AuditEntry, Decision, StageId, StageResult};
use crate::document::InvoicePayload;
use crate::errors::{InvoiceflowError, Result, ValidationError};
use crate::routing::SelectionRecord;

/// Key holding the submitted invoice.
pub const INVOICE_KEY: &str = "invoice_payload";

/// Stage outputs accumulated over a run.
///
/// Scalar `fields` are overwritten by later stages; the three logs only
/// ever grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateBag {
    /// Output fields keyed by output key.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    /// One entry per stage action.
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
    /// Every backend selection made.
    #[serde(default)]
    pub tool_selections: Vec<SelectionRecord>,
    /// Errors recorded when a stage failed.
    #[serde(default)]
    pub error_log: Vec<serde_json::Value>,
}

impl StateBag {
    /// Creates a bag holding the submitted invoice.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the invoice cannot be encoded.
    pub fn with_invoice(invoice: &InvoicePayload) -> Result<Self> {
        let mut bag = Self::default();
        bag.fields
            .insert(INVOICE_KEY.to_string(), serde_json::to_value(invoice)?);
        Ok(bag)
    }

    /// Returns a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Returns a field deserialized as `T`, or `None` if absent or of
    /// another shape.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.fields
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The submitted invoice.
    ///
    /// # Errors
    ///
    /// Returns a validation error attributed to `stage` if the invoice is
    /// missing or malformed.
    pub fn invoice(&self, stage: StageId) -> std::result::Result<InvoicePayload, ValidationError> {
        let raw = self
            .fields
            .get(INVOICE_KEY)
            .ok_or_else(|| ValidationError::single(stage, INVOICE_KEY, "missing"))?;
        InvoicePayload::from_value(raw, stage)
    }

    /// The match score, if matching has run.
    #[must_use]
    pub fn match_score(&self) -> Option<f64> {
        self.fields.get("match_score").and_then(serde_json::Value::as_f64)
    }

    /// The match verdict, if matching has run.
    #[must_use]
    pub fn match_result(&self) -> Option<&str> {
        self.fields.get("match_result").and_then(serde_json::Value::as_str)
    }

    /// The recorded human decision.
    #[must_use]
    pub fn human_decision(&self) -> Option<Decision> {
        self.fields
            .get("human_decision")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Merges a validated stage result.
    pub fn merge(&mut self, result: &StageResult) {
        for (key, value) in &result.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        self.audit_log.extend(result.audit.iter().cloned());
        self.tool_selections.extend(result.selections.iter().cloned());
    }

    /// Appends a failure to the error log.
    pub fn record_error(&mut self, stage: StageId, error: &InvoiceflowError) {
        let mut entry = serde_json::Map::new();
        for (key, value) in error.to_dict() {
            entry.insert(key, value);
        }
        entry.insert("stage".to_string(), serde_json::json!(stage));
        entry.insert(
            "timestamp".to_string(),
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
        );
        self.error_log.push(serde_json::Value::Object(entry));
    }

    /// SHA-256 of the serialized bag, hex encoded.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the bag cannot be encoded.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Checks the bag against a previously computed digest.
    ///
    /// # Errors
    ///
    /// Returns a store error if the digests differ.
    pub fn verify(&self, expected: &str) -> Result<()> {
        let actual = self.digest()?;
        if actual == expected {
            Ok(())
        } else {
            Err(InvoiceflowError::store(format!(
                "state digest mismatch: expected {expected}, found {actual}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::LineItem;
    use serde_json::json;

    fn bag() -> StateBag {
        StateBag::with_invoice(&InvoicePayload::new(
            "INV-1",
            "Acme",
            100.0,
            vec![LineItem::new("Widget", 1.0, 100.0)],
        ))
        .unwrap()
    }

    #[test]
    fn test_merge_overwrites_scalars_and_appends_logs() {
        let mut state = bag();
        state.merge(
            &StageResult::new(StageId::MatchTwoWay)
                .with_field("match_score", json!(0.5))
                .with_audit("match_computed", json!({})),
        );
        state.merge(
            &StageResult::new(StageId::MatchTwoWay)
                .with_field("match_score", json!(0.95))
                .with_audit("match_computed", json!({})),
        );

        assert_eq!(state.match_score(), Some(0.95));
        assert_eq!(state.audit_log.len(), 2);
    }

    #[test]
    fn test_invoice_round_trip() {
        let state = bag();
        assert_eq!(state.invoice(StageId::Intake).unwrap().invoice_id, "INV-1");
        assert!(StateBag::default().invoice(StageId::Intake).is_err());
    }

    #[test]
    fn test_digest_detects_tampering() {
        let mut state = bag();
        let digest = state.digest().unwrap();
        assert!(state.verify(&digest).is_ok());

        state.fields.insert("match_score".into(), json!(1.0));
        assert!(state.verify(&digest).is_err());
    }

    #[test]
    fn test_record_error() {
        let mut state = bag();
        let err: InvoiceflowError =
            crate::errors::StageFailureError::new(StageId::Posting, "ERP down").into();
        state.record_error(StageId::Posting, &err);
        assert_eq!(state.error_log[0]["type"], "StageFailure");
        assert_eq!(state.error_log[0]["stage"], "POSTING");
    }

    #[test]
    fn test_human_decision_parse() {
        let mut state = bag();
        assert_eq!(state.human_decision(), None);
        state.fields.insert("human_decision".into(), json!("REJECT"));
        assert_eq!(state.human_decision(), Some(Decision::Reject));
    }
}
