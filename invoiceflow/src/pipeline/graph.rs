//! The invoice stage graph.
//!
//! Transitions are a pure function of the stage just completed and the
//! state bag, so re-evaluating them after a restore yields the same edge.

use crate::context::StateBag;
use crate::core::{Branch, Decision, RunStatus, StageId};

/// Post-match branch: pause for review when the verdict failed or the
/// score is below `threshold`.
#[must_use]
pub fn decide(state: &StateBag, threshold: f64) -> Branch {
    let failed = state.match_result() == Some("FAILED");
    let below = state.match_score().map_or(true, |score| score < threshold);
    if failed || below {
        Branch::Pause
    } else {
        Branch::Continue
    }
}

/// The stage that follows `stage`, given the bag after its result was
/// merged. Terminal stages lead to `END`.
#[must_use]
pub fn next_stage(stage: StageId, state: &StateBag, threshold: f64) -> StageId {
    match stage {
        StageId::Start => StageId::Intake,
        StageId::Intake => StageId::Understand,
        StageId::Understand => StageId::Prepare,
        StageId::Prepare => StageId::Retrieve,
        StageId::Retrieve => StageId::MatchTwoWay,
        StageId::MatchTwoWay => match decide(state, threshold) {
            Branch::Continue => StageId::Reconcile,
            Branch::Pause => StageId::CheckpointHitl,
        },
        StageId::CheckpointHitl => StageId::HitlDecision,
        StageId::HitlDecision => match state.human_decision() {
            Some(Decision::Accept) => StageId::Reconcile,
            _ => StageId::ManualHandoff,
        },
        StageId::Reconcile => StageId::Approve,
        StageId::Approve => StageId::Posting,
        StageId::Posting => StageId::Notify,
        StageId::Notify => StageId::Complete,
        StageId::Complete | StageId::ManualHandoff | StageId::End => StageId::End,
    }
}

/// Run status once `stage` has committed.
#[must_use]
pub fn status_after(stage: StageId, state: &StateBag) -> RunStatus {
    match stage {
        StageId::Complete => RunStatus::Completed,
        StageId::ManualHandoff => match state.human_decision() {
            Some(Decision::Cancel) => RunStatus::Failed,
            _ => RunStatus::ManualHandlingRequired,
        },
        _ => RunStatus::Running,
    }
}
