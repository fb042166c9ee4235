//! Assertions over run records and transition events.

use crate::core::{RunStatus, TransitionEvent};
use crate::store::{RunRecord, RunStore};

/// Asserts that the run has the expected status.
pub fn assert_run_status(run: &RunRecord, expected: RunStatus) {
    assert_eq!(
        run.status, expected,
        "Expected run {} to be {}, got {} at stage {} (error: {:?})",
        run.run_id, expected, run.status, run.current_stage, run.error
    );
}

/// Asserts that event revisions never go backwards and that every
/// `stage.completed` event carries a new revision.
pub fn assert_revisions_increasing(events: &[TransitionEvent]) {
    let mut last_commit: Option<u64> = None;
    for pair in events.windows(2) {
        assert!(
            pair[1].revision >= pair[0].revision,
            "Revision went backwards: {} then {}",
            pair[0].revision,
            pair[1].revision
        );
    }
    for event in events.iter().filter(|e| e.event_type == "stage.completed") {
        if let Some(previous) = last_commit {
            assert!(
                event.revision > previous,
                "Revision {} committed twice",
                event.revision
            );
        }
        last_commit = Some(event.revision);
    }
}

/// Asserts that the store holds no checkpoint or review for the run.
pub fn assert_no_review_created(store: &dyn RunStore, run: &RunRecord) {
    assert!(
        run.active_checkpoint.is_none(),
        "Run {} has active checkpoint {:?}",
        run.run_id,
        run.active_checkpoint
    );
    let reviews = store
        .list_pending_reviews()
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.run_id == run.run_id)
        .count();
    assert_eq!(reviews, 0, "Run {} has {reviews} pending review(s)", run.run_id);
    assert!(
        !run.state.fields.contains_key("hitl_checkpoint_id"),
        "Run {} went through the checkpoint stage",
        run.run_id
    );
}
