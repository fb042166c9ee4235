//! Stage results and audit entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::StageId;
use crate::errors::StageFailureError;
use crate::routing::SelectionRecord;

/// What the executor should do after a stage returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Merge the result and follow the graph edge.
    Proceed,
    /// No decision is available yet; the run must suspend.
    AwaitDecision,
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Stage that produced the entry.
    pub stage: StageId,
    /// Short action name (e.g. `match_computed`).
    pub action: String,
    /// When the entry was produced.
    pub timestamp: DateTime<Utc>,
    /// Free-form detail.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEntry {
    /// Creates a new audit entry stamped now.
    #[must_use]
    pub fn new(stage: StageId, action: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            stage,
            action: action.into(),
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Output of one stage execution.
///
/// Scalar `fields` overwrite state-bag entries; `audit` and `selections`
/// are appended to the run's logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage that produced this result.
    pub stage: StageId,
    /// What the executor should do next.
    pub outcome: StageOutcome,
    /// Output fields, keyed by the stage's declared output keys.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Audit entries produced by the stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit: Vec<AuditEntry>,
    /// Tool selections made by the stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<SelectionRecord>,
    /// When the stage finished.
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    /// Creates an empty result that proceeds along the graph.
    #[must_use]
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Proceed,
            fields: BTreeMap::new(),
            audit: Vec::new(),
            selections: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Creates a result signalling that no decision is available yet.
    #[must_use]
    pub fn await_decision(stage: StageId) -> Self {
        Self {
            outcome: StageOutcome::AwaitDecision,
            ..Self::new(stage)
        }
    }

    /// Adds an output field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Adds an audit entry for this stage.
    #[must_use]
    pub fn with_audit(mut self, action: impl Into<String>, details: serde_json::Value) -> Self {
        self.audit.push(AuditEntry::new(self.stage, action, details));
        self
    }

    /// Records a tool selection.
    #[must_use]
    pub fn with_selection(mut self, record: SelectionRecord) -> Self {
        self.selections.push(record);
        self
    }

    /// Returns an output field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Checks the result against the stage's fixed output schema.
    ///
    /// # Errors
    ///
    /// Returns `StageFailureError` if a declared key is missing or an
    /// undeclared key is present.
    pub fn validate_schema(&self) -> Result<(), StageFailureError> {
        if self.outcome == StageOutcome::AwaitDecision {
            return if self.fields.is_empty() {
                Ok(())
            } else {
                Err(StageFailureError::new(
                    self.stage,
                    "a suspending result must not carry output fields",
                ))
            };
        }

        let declared = self.stage.output_keys();

        if let Some(extra) = self.fields.keys().find(|k| !declared.contains(&k.as_str())) {
            return Err(StageFailureError::new(
                self.stage,
                format!("undeclared output key '{extra}'"),
            ));
        }

        let missing: Vec<&str> = declared
            .iter()
            .copied()
            .filter(|k| !self.fields.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(StageFailureError::new(
                self.stage,
                format!("missing output keys: {}", missing.join(", ")),
            ));
        }

        Ok(())
    }

    /// Compact summary for transition events.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        let scalars: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .filter(|(_, v)| !v.is_object() && !v.is_array())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        serde_json::json!({
            "stage": self.stage,
            "outcome": self.outcome,
            "keys": self.fields.keys().collect::<Vec<_>>(),
            "values": scalars,
            "selections": self.selections.iter().map(|s| &s.selected).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_schema_accepts_exact_keys() {
        let result = StageResult::new(StageId::Posting)
            .with_field("posted", json!(true))
            .with_field("erp_txn_id", json!("ERP-1"))
            .with_field("scheduled_payment_id", json!("PAY-1"));
        assert!(result.validate_schema().is_ok());
    }

    #[test]
    fn test_validate_schema_rejects_undeclared_key() {
        let result = StageResult::new(StageId::Notify)
            .with_field("notify_status", json!({}))
            .with_field("notified_parties", json!([]))
            .with_field("status", json!("COMPLETED"));
        let err = result.validate_schema().unwrap_err();
        assert!(err.message.contains("undeclared output key 'status'"));
    }

    #[test]
    fn test_validate_schema_rejects_missing_key() {
        let result = StageResult::new(StageId::Complete);
        let err = result.validate_schema().unwrap_err();
        assert!(err.message.contains("final_payload"));
    }

    #[test]
    fn test_await_decision_must_be_empty() {
        assert!(StageResult::await_decision(StageId::HitlDecision)
            .validate_schema()
            .is_ok());

        let mut bad = StageResult::await_decision(StageId::HitlDecision);
        bad.fields.insert("human_decision".into(), json!("ACCEPT"));
        assert!(bad.validate_schema().is_err());
    }

    #[test]
    fn test_summary_skips_nested_values() {
        let result = StageResult::new(StageId::MatchTwoWay)
            .with_field("match_score", json!(0.5))
            .with_field("match_evidence", json!({"a": 1}));
        let summary = result.summary();
        assert_eq!(summary["values"]["match_score"], json!(0.5));
        assert!(summary["values"].get("match_evidence").is_none());
        assert_eq!(summary["keys"].as_array().unwrap().len(), 2);
    }
}
