//! Persisted records: runs, checkpoints and review items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::context::StateBag;
use crate::core::{Decision, RunStatus, StageId, StageResult};
use crate::errors::Result;

/// One execution of the pipeline for one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: Uuid,
    /// Stage pointer: the next stage to run, or `END`.
    pub current_stage: StageId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Incremented on every committed stage transition.
    pub revision: u64,
    /// Accumulated outputs.
    pub state: StateBag,
    /// Unresolved checkpoint, while suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_checkpoint: Option<String>,
    /// Review-stage results keyed by the checkpoint they consumed.
    #[serde(default)]
    pub consumed_decisions: BTreeMap<String, StageResult>,
    /// Terminal error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    /// When the run was submitted.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Creates a run at `START`, revision 0.
    #[must_use]
    pub fn new(run_id: Uuid, state: StateBag) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            current_stage: StageId::Start,
            status: RunStatus::Running,
            revision: 0,
            state,
            active_checkpoint: None,
            consumed_decisions: BTreeMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable snapshot of a suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint identifier.
    pub checkpoint_id: String,
    /// Owning run.
    pub run_id: Uuid,
    /// Run revision at suspension.
    pub revision: u64,
    /// Stage the run is parked at.
    pub stage: StageId,
    /// State bag at suspension.
    pub state: StateBag,
    /// SHA-256 of `state`.
    pub state_digest: String,
    /// Why the run was suspended.
    pub reason: String,
    /// When it was written.
    pub created_at: DateTime<Utc>,
    /// Whether a decision has been recorded.
    #[serde(default)]
    pub resolved: bool,
    /// When the decision was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Snapshots `run` at its current revision.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the state cannot be digested.
    pub fn snapshot(
        checkpoint_id: impl Into<String>,
        run: &RunRecord,
        reason: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            checkpoint_id: checkpoint_id.into(),
            run_id: run.run_id,
            revision: run.revision,
            stage: run.current_stage,
            state: run.state.clone(),
            state_digest: run.state.digest()?,
            reason: reason.into(),
            created_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        })
    }

    /// The snapshot state, after checking its digest.
    ///
    /// # Errors
    ///
    /// Returns a store error if the state does not match its digest.
    pub fn restore(&self) -> Result<StateBag> {
        self.state.verify(&self.state_digest)?;
        Ok(self.state.clone())
    }
}

/// Review item lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewState {
    /// Awaiting a decision.
    Pending,
    /// Decided.
    Resolved,
}

impl ReviewState {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded human decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The decision.
    pub decision: Decision,
    /// Free-text notes.
    #[serde(default)]
    pub notes: String,
    /// Who decided.
    pub reviewer_id: String,
    /// When.
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    /// Creates a resolution stamped now.
    #[must_use]
    pub fn new(decision: Decision, notes: impl Into<String>, reviewer_id: impl Into<String>) -> Self {
        Self {
            decision,
            notes: notes.into(),
            reviewer_id: reviewer_id.into(),
            resolved_at: Utc::now(),
        }
    }
}

/// Document identifiers shown to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewContext {
    /// Invoice number.
    pub invoice_id: String,
    /// Vendor name.
    pub vendor_name: String,
    /// Invoice total.
    pub amount: f64,
    /// Currency.
    pub currency: String,
    /// Referenced PO.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub po_number: Option<String>,
    /// Match score that caused the pause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_score: Option<f64>,
}

/// Queue entry asking for a decision on a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Review identifier.
    pub review_id: String,
    /// Owning run.
    pub run_id: Uuid,
    /// Checkpoint being reviewed.
    pub checkpoint_id: String,
    /// Human-readable reason.
    pub reason: String,
    /// Document identifiers.
    pub context: ReviewContext,
    /// When it was enqueued.
    pub created_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: ReviewState,
    /// Decision, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl ReviewItem {
    /// Creates a pending item for a checkpoint.
    #[must_use]
    pub fn pending(
        review_id: impl Into<String>,
        checkpoint: &Checkpoint,
        context: ReviewContext,
    ) -> Self {
        Self {
            review_id: review_id.into(),
            run_id: checkpoint.run_id,
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            reason: checkpoint.reason.clone(),
            context,
            created_at: checkpoint.created_at,
            state: ReviewState::Pending,
            resolution: None,
        }
    }

    /// True while awaiting a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == ReviewState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_restore_checks_digest() {
        let mut run = RunRecord::new(Uuid::new_v4(), StateBag::default());
        run.state.fields.insert("match_score".into(), json!(0.4));
        run.revision = 6;

        let mut checkpoint = Checkpoint::snapshot("ckpt-1", &run, "low score").unwrap();
        assert_eq!(checkpoint.revision, 6);
        assert!(checkpoint.restore().is_ok());

        checkpoint.state.fields.insert("match_score".into(), json!(0.99));
        assert!(checkpoint.restore().is_err());
    }

    #[test]
    fn test_review_item_pending() {
        let run = RunRecord::new(Uuid::new_v4(), StateBag::default());
        let checkpoint = Checkpoint::snapshot("ckpt-1", &run, "low score").unwrap();
        let item = ReviewItem::pending(
            "review-1",
            &checkpoint,
            ReviewContext {
                invoice_id: "INV-1".into(),
                vendor_name: "Acme".into(),
                amount: 10.0,
                currency: "USD".into(),
                po_number: None,
                match_score: Some(0.4),
            },
        );
        assert!(item.is_pending());
        assert_eq!(item.checkpoint_id, "ckpt-1");
        assert_eq!(item.reason, "low score");
        assert_eq!(serde_json::to_value(item.state).unwrap(), "pending");
    }
}
