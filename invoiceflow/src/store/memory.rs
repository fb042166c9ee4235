//! In-memory store.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{ensure_resolvable, Checkpoint, Resolution, ReviewItem, ReviewState, RunRecord, RunStore};
use crate::errors::{InvoiceflowError, Result};

#[derive(Debug, Default)]
struct Tables {
    runs: HashMap<Uuid, RunRecord>,
    run_order: Vec<Uuid>,
    checkpoints: HashMap<String, Checkpoint>,
    reviews: HashMap<String, ReviewItem>,
    review_order: Vec<String>,
}

impl Tables {
    fn run(&self, run_id: Uuid) -> Result<&RunRecord> {
        self.runs
            .get(&run_id)
            .ok_or_else(|| InvoiceflowError::not_found("run", run_id.to_string()))
    }

    fn check_revision(&self, run_id: Uuid, expected: u64) -> Result<()> {
        let found = self.run(run_id)?.revision;
        if found == expected {
            Ok(())
        } else {
            Err(InvoiceflowError::RevisionConflict {
                run_id: run_id.to_string(),
                expected,
                found,
            })
        }
    }

    fn active_for(&self, run_id: Uuid) -> Option<&Checkpoint> {
        self.checkpoints
            .values()
            .find(|c| c.run_id == run_id && !c.resolved)
    }
}

/// Store backed by process memory.
///
/// A single mutex guards all tables, so every operation is atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryStore {
    fn insert_run(&self, run: &RunRecord) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.runs.contains_key(&run.run_id) {
            return Err(InvoiceflowError::store(format!("run {} already exists", run.run_id)));
        }
        tables.runs.insert(run.run_id, run.clone());
        tables.run_order.push(run.run_id);
        Ok(())
    }

    fn load_run(&self, run_id: Uuid) -> Result<RunRecord> {
        self.tables.lock().run(run_id).cloned()
    }

    fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .run_order
            .iter()
            .filter_map(|id| tables.runs.get(id).cloned())
            .collect())
    }

    fn commit_run(&self, run: &RunRecord, expected_revision: u64) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.check_revision(run.run_id, expected_revision)?;
        let mut stored = run.clone();
        stored.updated_at = Utc::now();
        tables.runs.insert(run.run_id, stored);
        Ok(())
    }

    fn suspend_run(
        &self,
        run: &RunRecord,
        expected_revision: u64,
        checkpoint: &Checkpoint,
        review: &ReviewItem,
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        if let Some(active) = tables.active_for(run.run_id) {
            return Err(InvoiceflowError::ActiveCheckpointExists {
                run_id: run.run_id.to_string(),
                checkpoint_id: active.checkpoint_id.clone(),
            });
        }
        tables.check_revision(run.run_id, expected_revision)?;
        if tables.checkpoints.contains_key(&checkpoint.checkpoint_id)
            || tables.reviews.contains_key(&review.review_id)
        {
            return Err(InvoiceflowError::store("duplicate checkpoint or review id"));
        }

        let mut stored = run.clone();
        stored.updated_at = Utc::now();
        tables.runs.insert(run.run_id, stored);
        tables
            .checkpoints
            .insert(checkpoint.checkpoint_id.clone(), checkpoint.clone());
        tables.reviews.insert(review.review_id.clone(), review.clone());
        tables.review_order.push(review.review_id.clone());
        Ok(())
    }

    fn get_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        self.tables
            .lock()
            .checkpoints
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| InvoiceflowError::not_found("checkpoint", checkpoint_id))
    }

    fn active_checkpoint(&self, run_id: Uuid) -> Result<Option<Checkpoint>> {
        Ok(self.tables.lock().active_for(run_id).cloned())
    }

    fn mark_checkpoint_resolved(&self, checkpoint_id: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let checkpoint = tables
            .checkpoints
            .get_mut(checkpoint_id)
            .ok_or_else(|| InvoiceflowError::not_found("checkpoint", checkpoint_id))?;
        if !checkpoint.resolved {
            checkpoint.resolved = true;
            checkpoint.resolved_at = Some(Utc::now());
        }
        Ok(())
    }

    fn get_review(&self, review_id: &str) -> Result<ReviewItem> {
        self.tables
            .lock()
            .reviews
            .get(review_id)
            .cloned()
            .ok_or_else(|| InvoiceflowError::not_found("review", review_id))
    }

    fn review_for_checkpoint(&self, checkpoint_id: &str) -> Result<ReviewItem> {
        self.tables
            .lock()
            .reviews
            .values()
            .find(|r| r.checkpoint_id == checkpoint_id)
            .cloned()
            .ok_or_else(|| InvoiceflowError::not_found("review", checkpoint_id))
    }

    fn list_pending_reviews(&self) -> Result<Vec<ReviewItem>> {
        let tables = self.tables.lock();
        Ok(tables
            .review_order
            .iter()
            .filter_map(|id| tables.reviews.get(id))
            .filter(|r| r.is_pending())
            .cloned()
            .collect())
    }

    fn resolve_review(&self, review_id: &str, resolution: &Resolution) -> Result<ReviewItem> {
        let mut tables = self.tables.lock();

        let review = match tables.reviews.get(review_id) {
            Some(review) if review.is_pending() => review.clone(),
            _ => {
                return Err(InvoiceflowError::AlreadyResolved {
                    id: review_id.to_string(),
                })
            }
        };
        let checkpoint = tables
            .checkpoints
            .get(&review.checkpoint_id)
            .cloned()
            .ok_or_else(|| InvoiceflowError::not_found("checkpoint", &review.checkpoint_id))?;
        ensure_resolvable(tables.run(review.run_id)?, &checkpoint)?;

        let now = Utc::now();
        if let Some(cp) = tables.checkpoints.get_mut(&review.checkpoint_id) {
            cp.resolved = true;
            cp.resolved_at = Some(now);
        }
        let mut resolved = review;
        resolved.state = ReviewState::Resolved;
        resolved.resolution = Some(resolution.clone());
        tables
            .reviews
            .insert(resolved.review_id.clone(), resolved.clone());
        Ok(resolved)
    }
}
