//! Checkpoint and review-queue views over a [`RunStore`].

use std::sync::Arc;
use uuid::Uuid;

use super::{Checkpoint, Resolution, ReviewContext, ReviewItem, RunRecord, RunStore};
use crate::core::{Decision, RunStatus};
use crate::errors::{InvoiceflowError, Result};

/// Checkpoint operations.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    store: Arc<dyn RunStore>,
}

impl CheckpointStore {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Suspends `run` at its current revision.
    ///
    /// The checkpoint, its review item and the suspended run are written as
    /// one unit. Returns both new records.
    ///
    /// # Errors
    ///
    /// Returns `ActiveCheckpointExists` if the run already has an
    /// unresolved checkpoint; store errors leave nothing written.
    pub fn create(
        &self,
        run: &RunRecord,
        checkpoint_id: impl Into<String>,
        review_id: impl Into<String>,
        reason: impl Into<String>,
        context: ReviewContext,
    ) -> Result<(Checkpoint, ReviewItem)> {
        let checkpoint = Checkpoint::snapshot(checkpoint_id, run, reason)?;
        let review = ReviewItem::pending(review_id, &checkpoint, context);

        let mut suspended = run.clone();
        suspended.status = RunStatus::Suspended;
        suspended.active_checkpoint = Some(checkpoint.checkpoint_id.clone());

        self.store
            .suspend_run(&suspended, run.revision, &checkpoint, &review)?;
        tracing::info!(
            run_id = %run.run_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            review_id = %review.review_id,
            revision = run.revision,
            reason = %checkpoint.reason,
            "Checkpoint created"
        );
        Ok((checkpoint, review))
    }

    /// Loads a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown checkpoint.
    pub fn get(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        self.store.get_checkpoint(checkpoint_id)
    }

    /// Marks a checkpoint resolved; idempotent.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown checkpoint.
    pub fn mark_resolved(&self, checkpoint_id: &str) -> Result<()> {
        self.store.mark_checkpoint_resolved(checkpoint_id)
    }

    /// The run's unresolved checkpoint, if any.
    ///
    /// # Errors
    ///
    /// Fails if the store is unavailable.
    pub fn active_for_run(&self, run_id: Uuid) -> Result<Option<Checkpoint>> {
        self.store.active_checkpoint(run_id)
    }
}

/// What the executor needs to resume a run after a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeHandle {
    /// The run to resume.
    pub run_id: Uuid,
    /// The checkpoint that was resolved.
    pub checkpoint_id: String,
    /// The resolved review.
    pub review_id: String,
    /// The recorded decision.
    pub resolution: Resolution,
}

/// Pending human decisions.
#[derive(Debug, Clone)]
pub struct ReviewQueue {
    store: Arc<dyn RunStore>,
}

impl ReviewQueue {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Pending items in creation order. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Fails if the store is unavailable.
    pub fn list_pending(&self) -> Result<Vec<ReviewItem>> {
        self.store.list_pending_reviews()
    }

    /// Loads one item.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown review.
    pub fn get(&self, review_id: &str) -> Result<ReviewItem> {
        self.store.get_review(review_id)
    }

    /// Resolves a review exactly once.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` on a second call for the same review and
    /// `StaleResolution` if the run moved on.
    pub fn resolve(
        &self,
        review_id: &str,
        decision: Decision,
        notes: impl Into<String>,
        reviewer_id: impl Into<String>,
    ) -> Result<ResumeHandle> {
        let resolution = Resolution::new(decision, notes, reviewer_id);
        let item = self.store.resolve_review(review_id, &resolution)?;
        tracing::info!(
            run_id = %item.run_id,
            review_id = %item.review_id,
            checkpoint_id = %item.checkpoint_id,
            decision = %decision,
            reviewer_id = %resolution.reviewer_id,
            "Review resolved"
        );
        Ok(ResumeHandle {
            run_id: item.run_id,
            checkpoint_id: item.checkpoint_id,
            review_id: item.review_id,
            resolution,
        })
    }

    /// Resolves the review linked to a checkpoint.
    ///
    /// # Errors
    ///
    /// As [`ReviewQueue::resolve`]; an unknown checkpoint is reported as
    /// `AlreadyResolved`.
    pub fn resolve_by_checkpoint(
        &self,
        checkpoint_id: &str,
        decision: Decision,
        notes: impl Into<String>,
        reviewer_id: impl Into<String>,
    ) -> Result<ResumeHandle> {
        let item = match self.store.review_for_checkpoint(checkpoint_id) {
            Ok(item) => item,
            Err(InvoiceflowError::NotFound { .. }) => {
                return Err(InvoiceflowError::AlreadyResolved {
                    id: checkpoint_id.to_string(),
                })
            }
            Err(other) => return Err(other),
        };
        self.resolve(&item.review_id, decision, notes, reviewer_id)
    }
}
