//! Human review: checkpoint preparation, the decision point and the
//! manual handoff.

use async_trait::async_trait;
use serde_json::json;

use super::{response_field, Stage};
use crate::context::{StageContext, StateBag};
use crate::core::{Decision, StageId, StageResult};
use crate::errors::Result;

/// Human-readable reason for pausing a run.
#[must_use]
pub fn paused_reason(state: &StateBag, threshold: f64) -> String {
    let score = state.match_score().unwrap_or(0.0);
    let mismatched: Vec<String> = state
        .get("match_evidence")
        .and_then(|e| e.get("mismatched_fields"))
        .and_then(|m| serde_json::from_value(m.clone()).ok())
        .unwrap_or_default();

    let mut reason = format!("Match score {score:.2} below threshold {threshold:.2}");
    if !mismatched.is_empty() {
        reason.push_str("; mismatched: ");
        reason.push_str(&mismatched.join(", "));
    }
    reason
}

/// `CHECKPOINT_HITL`: allocates the checkpoint and review identifiers.
///
/// The checkpoint itself is written by the executor when the decision
/// stage finds no decision, together with its review item.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointStage;

#[async_trait]
impl Stage for CheckpointStage {
    fn id(&self) -> StageId {
        StageId::CheckpointHitl
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let db = ctx.select("db");
        let allocated = ctx
            .dispatch("create_checkpoint", Some(&db), json!({ "run_id": ctx.run_id }))
            .await?;
        let checkpoint_id: String =
            response_field(StageId::CheckpointHitl, "create_checkpoint", &allocated, "checkpoint_id")?;
        let review_id: String =
            response_field(StageId::CheckpointHitl, "create_checkpoint", &allocated, "review_id")?;
        let reason = paused_reason(&ctx.state, ctx.config().match_threshold);

        Ok(StageResult::new(StageId::CheckpointHitl)
            .with_audit(
                "checkpoint_prepared",
                json!({
                    "checkpoint_id": checkpoint_id,
                    "review_id": review_id,
                    "review_url": allocated["review_url"],
                    "reason": reason,
                    "db": db.selected,
                }),
            )
            .with_field("hitl_checkpoint_id", json!(checkpoint_id))
            .with_field("review_id", json!(review_id))
            .with_field("paused_reason", json!(reason))
            .with_selection(db))
    }
}

/// `HITL_DECISION`: consumes a recorded decision, or asks the executor to
/// suspend when none is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionStage;

#[async_trait]
impl Stage for DecisionStage {
    fn id(&self) -> StageId {
        StageId::HitlDecision
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let Some(resolution) = &ctx.resolution else {
            return Ok(StageResult::await_decision(StageId::HitlDecision));
        };

        Ok(StageResult::new(StageId::HitlDecision)
            .with_audit(
                "decision_recorded",
                json!({
                    "decision": resolution.decision,
                    "reviewer_id": resolution.reviewer_id,
                    "checkpoint_id": ctx.state.get("hitl_checkpoint_id"),
                    "resolved_at": resolution.resolved_at.to_rfc3339(),
                }),
            )
            .with_field("human_decision", json!(resolution.decision))
            .with_field("reviewer_id", json!(resolution.reviewer_id))
            .with_field("reviewer_notes", json!(resolution.notes)))
    }
}

/// `MANUAL_HANDOFF`: records why the document left the automated path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualHandoffStage;

#[async_trait]
impl Stage for ManualHandoffStage {
    fn id(&self) -> StageId {
        StageId::ManualHandoff
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let decision = ctx.state.human_decision();
        let notes = ctx
            .state
            .get("reviewer_notes")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let reviewer = ctx
            .state
            .get("reviewer_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");

        let reason = match (decision, notes.is_empty()) {
            (Some(Decision::Cancel), true) => format!("Cancelled by {reviewer}"),
            (Some(Decision::Cancel), false) => format!("Cancelled by {reviewer}: {notes}"),
            (_, true) => format!("Rejected by {reviewer}"),
            (_, false) => format!("Rejected by {reviewer}: {notes}"),
        };

        Ok(StageResult::new(StageId::ManualHandoff)
            .with_audit(
                "manual_handoff",
                json!({
                    "decision": decision,
                    "reviewer_id": reviewer,
                    "reason": reason,
                }),
            )
            .with_field("handoff_reason", json!(reason)))
    }
}
