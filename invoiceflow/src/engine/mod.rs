//! The invoice engine: the boundary operations callers use.
//!
//! - Submit a document and get a run id back immediately
//! - List pending reviews and resolve them
//! - Query or subscribe to run progress
//! - Operator tools: cancel, full run record, crash recovery

mod builder;

pub use builder::EngineBuilder;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::{Decision, RunStatus, StageId};
use crate::document::InvoicePayload;
use crate::errors::Result;
use crate::events::RunSubscription;
use crate::pipeline::Executor;
use crate::store::{ResumeHandle, ReviewItem, ReviewQueue, RunRecord};

/// A review awaiting a decision, with what a reviewer needs to decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
    /// Review identifier.
    pub review_id: String,
    /// Checkpoint to resolve.
    pub checkpoint_id: String,
    /// The suspended run.
    pub run_id: Uuid,
    /// Why the run paused.
    pub reason: String,
    /// Invoice number.
    pub invoice_id: String,
    /// Vendor as submitted.
    pub vendor_name: String,
    /// Invoice total.
    pub amount: f64,
    /// Currency code.
    pub currency: String,
    /// Matched purchase order.
    pub po_number: Option<String>,
    /// Match score.
    pub match_score: Option<f64>,
    /// When the review was queued.
    pub created_at: DateTime<Utc>,
}

impl From<ReviewItem> for PendingReview {
    fn from(item: ReviewItem) -> Self {
        Self {
            review_id: item.review_id,
            checkpoint_id: item.checkpoint_id,
            run_id: item.run_id,
            reason: item.reason,
            invoice_id: item.context.invoice_id,
            vendor_name: item.context.vendor_name,
            amount: item.context.amount,
            currency: item.context.currency,
            po_number: item.context.po_number,
            match_score: item.context.match_score,
            created_at: item.created_at,
        }
    }
}

/// A reviewer's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Checkpoint being resolved.
    pub checkpoint_id: String,
    /// The decision.
    pub decision: Decision,
    /// Free-text notes.
    #[serde(default)]
    pub notes: String,
    /// Who decided.
    pub reviewer_id: String,
}

impl ResolveRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        checkpoint_id: impl Into<String>,
        decision: Decision,
        notes: impl Into<String>,
        reviewer_id: impl Into<String>,
    ) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            decision,
            notes: notes.into(),
            reviewer_id: reviewer_id.into(),
        }
    }
}

/// Where a run ended up after a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// The resumed run.
    pub run_id: Uuid,
    /// The resolved checkpoint.
    pub checkpoint_id: String,
    /// Stage the run is at.
    pub stage: StageId,
    /// Run status.
    pub status: RunStatus,
    /// Run revision.
    pub revision: u64,
}

/// Lightweight view of a run for progress polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    /// The run.
    pub run_id: Uuid,
    /// Stage the run is at.
    pub current_stage: StageId,
    /// Run status.
    pub status: RunStatus,
    /// Run revision.
    pub revision: u64,
    /// Last commit time.
    pub updated_at: DateTime<Utc>,
}

impl From<&RunRecord> for RunProgress {
    fn from(run: &RunRecord) -> Self {
        Self {
            run_id: run.run_id,
            current_stage: run.current_stage,
            status: run.status,
            revision: run.revision,
            updated_at: run.updated_at,
        }
    }
}

/// Durable invoice-processing engine.
///
/// Cheap to clone; clones share the store, executor and event bus.
#[derive(Debug, Clone)]
pub struct InvoiceEngine {
    executor: Arc<Executor>,
    queue: ReviewQueue,
    config: Arc<EngineConfig>,
}

impl InvoiceEngine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a run and drives it on a background task.
    ///
    /// Returns as soon as the run is stored. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the run cannot be stored.
    pub fn submit(&self, invoice: &InvoicePayload) -> Result<Uuid> {
        let run_id = self.executor.submit(invoice)?.run_id;
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            if let Err(err) = executor.drive(run_id).await {
                tracing::error!(run_id = %run_id, error = %err, "Run driver stopped");
            }
        });
        Ok(run_id)
    }

    /// Starts a run and drives it to completion or suspension inline.
    ///
    /// # Errors
    ///
    /// Fails on store errors; stage errors are recorded on the run.
    pub async fn process(&self, invoice: &InvoicePayload) -> Result<RunRecord> {
        let run = self.executor.submit(invoice)?;
        self.executor.drive(run.run_id).await
    }

    /// Unresolved reviews, oldest first.
    ///
    /// # Errors
    ///
    /// Fails if the store is unavailable.
    pub fn list_pending_reviews(&self) -> Result<Vec<PendingReview>> {
        Ok(self
            .queue
            .list_pending()?
            .into_iter()
            .map(PendingReview::from)
            .collect())
    }

    /// Records a decision and resumes the run.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` if the checkpoint was already resolved or
    /// is unknown, and `StaleResolution` if the run moved on.
    pub async fn resolve_decision(&self, request: ResolveRequest) -> Result<ResolveResponse> {
        let handle = self.queue.resolve_by_checkpoint(
            &request.checkpoint_id,
            request.decision,
            request.notes,
            request.reviewer_id,
        )?;
        self.resume(&handle).await
    }

    /// Operator cancellation of a suspended run. The run ends as failed.
    ///
    /// # Errors
    ///
    /// As [`InvoiceEngine::resolve_decision`].
    pub async fn cancel(
        &self,
        checkpoint_id: &str,
        operator_id: &str,
        notes: &str,
    ) -> Result<ResolveResponse> {
        tracing::warn!(checkpoint_id, operator_id, "Cancelling suspended run");
        self.resolve_decision(ResolveRequest::new(
            checkpoint_id,
            Decision::Cancel,
            notes,
            operator_id,
        ))
        .await
    }

    async fn resume(&self, handle: &ResumeHandle) -> Result<ResolveResponse> {
        let outcome = self.executor.resume(handle).await?;
        Ok(ResolveResponse {
            run_id: outcome.run.run_id,
            checkpoint_id: handle.checkpoint_id.clone(),
            stage: outcome.run.current_stage,
            status: outcome.run.status,
            revision: outcome.run.revision,
        })
    }

    /// Current stage and status of a run.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown run.
    pub fn progress(&self, run_id: Uuid) -> Result<RunProgress> {
        Ok(RunProgress::from(&self.executor.store().load_run(run_id)?))
    }

    /// Subscribes to a run's transition events from now on.
    #[must_use]
    pub fn subscribe(&self, run_id: Uuid) -> RunSubscription {
        self.executor.events().subscribe(run_id)
    }

    /// The full run record, state bag included.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown run.
    pub fn run_record(&self, run_id: Uuid) -> Result<RunRecord> {
        self.executor.store().load_run(run_id)
    }

    /// Re-drives runs left running by a previous process and finishes
    /// resolutions that were recorded but never consumed.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn recover(&self) -> Result<Vec<RunProgress>> {
        let recovered = self.executor.recover().await?;
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "Recovered runs");
        }
        Ok(recovered.iter().map(RunProgress::from).collect())
    }

    /// Drives several documents concurrently, inline.
    ///
    /// # Errors
    ///
    /// Returns the first store error; the other runs still proceed.
    pub async fn process_all(&self, invoices: &[InvoicePayload]) -> Result<Vec<RunRecord>> {
        join_all(invoices.iter().map(|invoice| self.process(invoice)))
            .await
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::routing::{AvailabilityTable, CapabilityRegistry};
    use crate::store::InMemoryStore;
    use crate::testing::{self, assert_run_status};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn engine() -> InvoiceEngine {
        InvoiceEngine::builder()
            .with_external_surface(Arc::new(testing::simulated_erp()))
            .build()
            .unwrap()
    }

    async fn settled(engine: &InvoiceEngine, run_id: Uuid) -> RunProgress {
        for _ in 0..200 {
            let progress = engine.progress(run_id).unwrap();
            if progress.status != RunStatus::Running {
                return progress;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {run_id} did not settle");
    }

    #[tokio::test]
    async fn test_submit_returns_before_the_run_finishes() {
        let engine = engine();
        let run_id = engine.submit(&testing::scenario_a_invoice()).unwrap();

        let progress = settled(&engine, run_id).await;
        assert_eq!(progress.status, RunStatus::Completed);
        assert_eq!(progress.current_stage, StageId::End);
        assert!(engine.list_pending_reviews().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_review_round_trip() {
        let engine = engine();
        let run_id = engine.submit(&testing::scenario_b_invoice()).unwrap();
        assert_eq!(settled(&engine, run_id).await.status, RunStatus::Suspended);

        let pending = engine.list_pending_reviews().unwrap();
        assert_eq!(pending.len(), 1);
        let review = &pending[0];
        assert_eq!(review.run_id, run_id);
        assert_eq!(review.invoice_id, "INV-2024-002");
        assert_eq!(review.amount, 13_500.0);
        assert_eq!(review.po_number.as_deref(), Some(testing::SCENARIO_PO_NUMBER));

        let response = engine
            .resolve_decision(ResolveRequest::new(
                &review.checkpoint_id,
                Decision::Accept,
                "approved by phone",
                "alice",
            ))
            .await
            .unwrap();

        assert_eq!(response.run_id, run_id);
        assert_eq!(response.status, RunStatus::Completed);
        assert_eq!(response.stage, StageId::End);
        assert!(engine.list_pending_reviews().unwrap().is_empty());

        let record = engine.run_record(run_id).unwrap();
        assert_eq!(record.state.get("reviewer_notes").unwrap(), "approved by phone");
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_have_one_winner() {
        let engine = engine();
        let run = engine.process(&testing::scenario_b_invoice()).await.unwrap();
        let checkpoint_id = run.active_checkpoint.unwrap();

        let (first, second) = tokio::join!(
            engine.resolve_decision(ResolveRequest::new(&checkpoint_id, Decision::Accept, "", "a")),
            engine.resolve_decision(ResolveRequest::new(&checkpoint_id, Decision::Reject, "", "b")),
        );

        let outcomes = [first, second];
        let winners = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.kind(), "AlreadyResolved");
    }

    #[tokio::test]
    async fn test_cancel() {
        let engine = engine();
        let run = engine.process(&testing::scenario_b_invoice()).await.unwrap();
        let checkpoint_id = run.active_checkpoint.unwrap();

        let response = engine
            .cancel(&checkpoint_id, "ops-7", "vendor withdrew")
            .await
            .unwrap();
        assert_eq!(response.status, RunStatus::Failed);

        let record = engine.run_record(run.run_id).unwrap();
        assert_run_status(&record, RunStatus::Failed);
        assert_eq!(record.error.unwrap()["type"], "Cancelled");
    }

    #[tokio::test]
    async fn test_subscribe_sees_resume_transitions() {
        let engine = engine();
        let run = engine.process(&testing::scenario_b_invoice()).await.unwrap();
        let mut events = engine.subscribe(run.run_id);

        engine
            .resolve_decision(ResolveRequest::new(
                run.active_checkpoint.unwrap(),
                Decision::Reject,
                "",
                "bob",
            ))
            .await
            .unwrap();

        let first = events.next().await.unwrap();
        assert_eq!(first.event_type, "run.resumed");
        let rest = events.drain();
        assert_eq!(rest.last().unwrap().event_type, "run.manual-handling-required");
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let engine = engine();
        let err = engine.progress(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = InvoiceEngine::builder()
            .with_config(EngineConfig::default().with_match_threshold(1.5))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[tokio::test]
    async fn test_unavailable_backends_fall_back_to_placeholder() {
        let availability = AvailabilityTable::new().with_unavailable("primary_ocr", "down");
        let engine = InvoiceEngine::builder()
            .with_external_surface(Arc::new(testing::simulated_erp()))
            .with_capabilities(
                CapabilityRegistry::empty()
                    .with_pool("ocr", ["primary_ocr"])
                    .with_pool("erp_connector", ["sim_erp"]),
            )
            .with_availability(Arc::new(availability))
            .with_event_sink(Arc::new(CollectingEventSink::new()))
            .build()
            .unwrap();

        let run = engine.process(&testing::scenario_a_invoice()).await.unwrap();

        assert_run_status(&run, RunStatus::Completed);
        let ocr = run
            .state
            .tool_selections
            .iter()
            .find(|s| s.capability == "ocr")
            .unwrap();
        assert!(ocr.placeholder);
        assert!(ocr.selected.ends_with(":placeholder"));
        assert_eq!(ocr.rejected.len(), 1);
    }

    #[tokio::test]
    async fn test_process_all_runs_independently() {
        let engine = engine();
        let runs = engine
            .process_all(&[testing::scenario_a_invoice(), testing::scenario_b_invoice()])
            .await
            .unwrap();
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[1].status, RunStatus::Suspended);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_recover_after_restart() {
        use crate::context::StateBag;
        use crate::store::{RunStore, SqliteStore};

        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default()
            .with_database_url(dir.path().join("engine.db").display().to_string());

        // A run stored by a process that died before driving it.
        let run_id = {
            let store = SqliteStore::open(config.database_url.as_deref().unwrap()).unwrap();
            let state = StateBag::with_invoice(&testing::scenario_a_invoice()).unwrap();
            let run = RunRecord::new(Uuid::new_v4(), state);
            store.insert_run(&run).unwrap();
            run.run_id
        };

        let engine = InvoiceEngine::builder()
            .with_config(config)
            .with_external_surface(Arc::new(testing::simulated_erp()))
            .build()
            .unwrap();
        let recovered = engine.recover().await.unwrap();

        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].run_id, run_id);
        assert_eq!(recovered[0].status, RunStatus::Completed);
        assert_eq!(engine.progress(run_id).unwrap().revision, 10);
    }

    #[test]
    fn test_in_memory_store_is_default() {
        let engine = InvoiceEngine::builder()
            .with_store(Arc::new(InMemoryStore::new()))
            .build()
            .unwrap();
        assert_eq!(engine.config().match_threshold, 0.9);
    }
}
