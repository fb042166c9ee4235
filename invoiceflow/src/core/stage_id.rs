//! Stage identifiers for the invoice pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::StageMode;

/// Identifies a stage, or one of the `START`/`END` pseudo-states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageId {
    /// Pseudo-state before the first stage.
    Start,
    /// Accept and validate the submitted invoice.
    Intake,
    /// Text extraction and line-item parsing.
    Understand,
    /// Vendor normalization, enrichment and flags.
    Prepare,
    /// Fetch the referenced purchase orders.
    Retrieve,
    /// Two-way match against the purchase order.
    MatchTwoWay,
    /// Prepare the checkpoint for human review.
    CheckpointHitl,
    /// Await the external decision.
    HitlDecision,
    /// Build accounting entries.
    Reconcile,
    /// Apply the approval policy.
    Approve,
    /// Post to the ERP and schedule payment.
    Posting,
    /// Notify vendor and finance.
    Notify,
    /// Assemble the final payload.
    Complete,
    /// Record a manual handoff after rejection or cancellation.
    ManualHandoff,
    /// Pseudo-state after a terminal stage.
    End,
}

impl StageId {
    /// Every real stage, in declaration order.
    pub const STAGES: [StageId; 13] = [
        Self::Intake,
        Self::Understand,
        Self::Prepare,
        Self::Retrieve,
        Self::MatchTwoWay,
        Self::CheckpointHitl,
        Self::HitlDecision,
        Self::Reconcile,
        Self::Approve,
        Self::Posting,
        Self::Notify,
        Self::Complete,
        Self::ManualHandoff,
    ];

    /// Returns the wire name of the stage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Intake => "INTAKE",
            Self::Understand => "UNDERSTAND",
            Self::Prepare => "PREPARE",
            Self::Retrieve => "RETRIEVE",
            Self::MatchTwoWay => "MATCH_TWO_WAY",
            Self::CheckpointHitl => "CHECKPOINT_HITL",
            Self::HitlDecision => "HITL_DECISION",
            Self::Reconcile => "RECONCILE",
            Self::Approve => "APPROVE",
            Self::Posting => "POSTING",
            Self::Notify => "NOTIFY",
            Self::Complete => "COMPLETE",
            Self::ManualHandoff => "MANUAL_HANDOFF",
            Self::End => "END",
        }
    }

    /// Human-readable stage title.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Intake => "Accept Invoice",
            Self::Understand => "OCR & Parse",
            Self::Prepare => "Normalize & Enrich",
            Self::Retrieve => "Fetch ERP Data",
            Self::MatchTwoWay => "Two-Way Match",
            Self::CheckpointHitl => "Checkpoint",
            Self::HitlDecision => "Human Decision",
            Self::Reconcile => "Build Entries",
            Self::Approve => "Approval",
            Self::Posting => "Post to ERP",
            Self::Notify => "Notifications",
            Self::Complete => "Complete",
            Self::ManualHandoff => "Manual Handoff",
            Self::End => "End",
        }
    }

    /// Execution mode of the stage.
    #[must_use]
    pub fn mode(&self) -> StageMode {
        match self {
            Self::HitlDecision => StageMode::NonDeterministic,
            _ => StageMode::Deterministic,
        }
    }

    /// Returns true for the `START`/`END` pseudo-states.
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::Start | Self::End)
    }

    /// The fixed set of output keys a stage may write to the state bag.
    ///
    /// Every key must be present in the stage's result, and no other key
    /// is accepted.
    #[must_use]
    pub fn output_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Start | Self::End => &[],
            Self::Intake => &["raw_id", "ingest_ts", "validated"],
            Self::Understand => &["parsed_invoice"],
            Self::Prepare => &["vendor_profile", "normalized_invoice", "flags"],
            Self::Retrieve => &["matched_pos", "matched_grns"],
            Self::MatchTwoWay => &["match_score", "match_result", "tolerance_pct", "match_evidence"],
            Self::CheckpointHitl => &["hitl_checkpoint_id", "review_id", "paused_reason"],
            Self::HitlDecision => &["human_decision", "reviewer_id", "reviewer_notes"],
            Self::Reconcile => &["accounting_entries", "reconciliation_report"],
            Self::Approve => &["approval_status", "approver_id", "approval_policy"],
            Self::Posting => &["posted", "erp_txn_id", "scheduled_payment_id"],
            Self::Notify => &["notify_status", "notified_parties"],
            Self::Complete => &["final_payload"],
            Self::ManualHandoff => &["handoff_reason"],
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Start, Self::End]
            .into_iter()
            .chain(Self::STAGES)
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}
