//! Durable storage for runs, checkpoints and review items.
//!
//! Every multi-record operation on a [`RunStore`] is atomic: a checkpoint is
//! never visible without its review item, and a run never changes revision
//! without its state bag.

mod memory;
mod queue;
mod records;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::fmt::Debug;
use uuid::Uuid;

use crate::core::RunStatus;
use crate::errors::{InvoiceflowError, Result};

pub use memory::InMemoryStore;
pub use queue::{CheckpointStore, ResumeHandle, ReviewQueue};
pub use records::{Checkpoint, Resolution, ReviewContext, ReviewItem, ReviewState, RunRecord};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Storage contract for the executor.
pub trait RunStore: Send + Sync + Debug {
    /// Inserts a new run.
    ///
    /// # Errors
    ///
    /// Fails if the run already exists or the store is unavailable.
    fn insert_run(&self, run: &RunRecord) -> Result<()>;

    /// Loads a run.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown run.
    fn load_run(&self, run_id: Uuid) -> Result<RunRecord>;

    /// Lists every run, oldest first.
    ///
    /// # Errors
    ///
    /// Fails if the store is unavailable.
    fn list_runs(&self) -> Result<Vec<RunRecord>>;

    /// Replaces a run if its stored revision is still `expected_revision`.
    ///
    /// # Errors
    ///
    /// Returns `RevisionConflict` if another writer committed first.
    fn commit_run(&self, run: &RunRecord, expected_revision: u64) -> Result<()>;

    /// Writes the checkpoint, the review item and the suspended run in one
    /// atomic unit.
    ///
    /// # Errors
    ///
    /// Returns `ActiveCheckpointExists` if the run already has an
    /// unresolved checkpoint, or `RevisionConflict` on a stale write.
    fn suspend_run(
        &self,
        run: &RunRecord,
        expected_revision: u64,
        checkpoint: &Checkpoint,
        review: &ReviewItem,
    ) -> Result<()>;

    /// Loads a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown checkpoint.
    fn get_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint>;

    /// The run's unresolved checkpoint, if any.
    ///
    /// # Errors
    ///
    /// Fails if the store is unavailable.
    fn active_checkpoint(&self, run_id: Uuid) -> Result<Option<Checkpoint>>;

    /// Marks a checkpoint resolved. Resolving twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown checkpoint.
    fn mark_checkpoint_resolved(&self, checkpoint_id: &str) -> Result<()>;

    /// Loads a review item.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown review.
    fn get_review(&self, review_id: &str) -> Result<ReviewItem>;

    /// The review item linked to a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no review references the checkpoint.
    fn review_for_checkpoint(&self, checkpoint_id: &str) -> Result<ReviewItem>;

    /// Pending reviews in creation order.
    ///
    /// # Errors
    ///
    /// Fails if the store is unavailable.
    fn list_pending_reviews(&self) -> Result<Vec<ReviewItem>>;

    /// Records a decision: flips the review from pending to resolved and
    /// marks its checkpoint resolved, as one compare-and-swap.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` if the review is unknown or not pending,
    /// and `StaleResolution` if the run is no longer suspended at the
    /// checkpoint's revision.
    fn resolve_review(&self, review_id: &str, resolution: &Resolution) -> Result<ReviewItem>;
}

/// Checks that `run` is still parked at `checkpoint`.
pub(crate) fn ensure_resolvable(run: &RunRecord, checkpoint: &Checkpoint) -> Result<()> {
    if run.status != RunStatus::Suspended {
        return Err(InvoiceflowError::stale(
            &checkpoint.checkpoint_id,
            format!("run is {}, not suspended", run.status),
        ));
    }
    if run.active_checkpoint.as_deref() != Some(checkpoint.checkpoint_id.as_str()) {
        return Err(InvoiceflowError::stale(
            &checkpoint.checkpoint_id,
            "run is suspended at a different checkpoint",
        ));
    }
    if run.revision != checkpoint.revision {
        return Err(InvoiceflowError::stale(
            &checkpoint.checkpoint_id,
            format!(
                "run is at revision {}, checkpoint was taken at {}",
                run.revision, checkpoint.revision
            ),
        ));
    }
    Ok(())
}
