//! End-to-end runs through the executor.

use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use uuid::Uuid;

use super::retry::RetryConfig;
use super::Executor;
use crate::config::EngineConfig;
use crate::context::StageServices;
use crate::core::{Decision, RunStatus, StageId};
use crate::document::InvoicePayload;
use crate::errors::InvoiceflowError;
use crate::events::{CollectingEventSink, EventBus};
use crate::stages::{DecisionStage, StageRegistry};
use crate::store::{
    Checkpoint, InMemoryStore, Resolution, ResumeHandle, ReviewItem, ReviewQueue, RunRecord,
    RunStore,
};
use crate::surfaces::{Dispatcher, InternalSurface, SimulatedExternalSurface};
use crate::testing::{
    self, assert_no_review_created, assert_revisions_increasing, assert_run_status, CountingStage,
    FailingStage,
};

struct Harness {
    executor: Arc<Executor>,
    queue: ReviewQueue,
    store: Arc<dyn RunStore>,
    external: Arc<SimulatedExternalSurface>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<CollectingEventSink>,
}

impl Harness {
    fn new() -> Self {
        Self::with(Arc::new(InMemoryStore::new()), StageRegistry::standard())
    }

    fn with(store: Arc<dyn RunStore>, stages: StageRegistry) -> Self {
        let config = EngineConfig::default();
        let external = Arc::new(testing::simulated_erp());
        let dispatcher = Arc::new(Dispatcher::new(
            Default::default(),
            Arc::new(InternalSurface::new(config.match_config(), config.approval_policy())),
            external.clone(),
            RetryConfig::immediate(3),
        ));
        let services =
            StageServices::new(Arc::clone(&dispatcher), Arc::default(), Arc::new(config));
        let sink = Arc::new(CollectingEventSink::new());
        let events = EventBus::default().with_sink(sink.clone());

        Self {
            executor: Arc::new(Executor::new(Arc::clone(&store), stages, services, events)),
            queue: ReviewQueue::new(Arc::clone(&store)),
            store,
            external,
            dispatcher,
            sink,
        }
    }

    async fn process(&self, invoice: &InvoicePayload) -> RunRecord {
        let run = self.executor.submit(invoice).unwrap();
        self.executor.drive(run.run_id).await.unwrap()
    }

    async fn suspended_b(&self) -> (RunRecord, String) {
        let run = self.process(&testing::scenario_b_invoice()).await;
        assert_run_status(&run, RunStatus::Suspended);
        let checkpoint_id = run.active_checkpoint.clone().unwrap();
        (run, checkpoint_id)
    }
}

#[tokio::test]
async fn test_scenario_a_completes_without_review() {
    let h = Harness::new();
    let run = h.process(&testing::scenario_a_invoice()).await;

    assert_run_status(&run, RunStatus::Completed);
    assert_eq!(run.current_stage, StageId::End);
    assert_eq!(run.revision, 10);
    assert_eq!(run.state.match_score(), Some(1.0));
    assert_eq!(run.state.match_result(), Some("MATCHED"));
    assert_eq!(run.state.get("final_payload").unwrap()["status"], "COMPLETED");
    assert_no_review_created(h.store.as_ref(), &run);

    let stored = h.store.load_run(run.run_id).unwrap();
    assert_eq!(stored.revision, run.revision);
    assert_eq!(stored.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_scenario_b_suspends_with_one_checkpoint() {
    let h = Harness::new();
    let (run, checkpoint_id) = h.suspended_b().await;

    assert_eq!(run.current_stage, StageId::HitlDecision);
    assert_eq!(run.revision, 6);
    assert_eq!(run.state.match_result(), Some("FAILED"));
    assert!(run.state.match_score().unwrap() < 0.9);

    let pending = h.queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    let review = &pending[0];
    assert_eq!(review.run_id, run.run_id);
    assert_eq!(review.checkpoint_id, checkpoint_id);
    assert_eq!(review.context.invoice_id, "INV-2024-002");
    assert_eq!(review.context.po_number.as_deref(), Some(testing::SCENARIO_PO_NUMBER));
    assert!(review.reason.starts_with("Match score 0.42 below threshold 0.90"));

    let checkpoint = h.store.get_checkpoint(&checkpoint_id).unwrap();
    assert_eq!(checkpoint.revision, run.revision);
    assert_eq!(checkpoint.stage, StageId::HitlDecision);
    assert!(!checkpoint.resolved);

    let stored = h.store.load_run(run.run_id).unwrap();
    assert_eq!(stored.status, RunStatus::Suspended);
    assert_eq!(stored.active_checkpoint.as_deref(), Some(checkpoint_id.as_str()));
}

#[tokio::test]
async fn test_scenario_c_accept_completes() {
    let h = Harness::new();
    let (_, checkpoint_id) = h.suspended_b().await;

    let handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Accept, "partial delivery agreed", "alice")
        .unwrap();
    let outcome = h.executor.resume(&handle).await.unwrap();

    assert!(!outcome.replayed);
    assert_run_status(&outcome.run, RunStatus::Completed);
    assert_eq!(outcome.run.revision, 12);
    assert!(outcome.run.active_checkpoint.is_none());
    assert_eq!(outcome.run.state.human_decision(), Some(Decision::Accept));
    assert_eq!(outcome.run.state.get("approval_status").unwrap(), "APPROVED");
    assert!(outcome.run.consumed_decisions.contains_key(&checkpoint_id));
    assert!(h.queue.list_pending().unwrap().is_empty());
    assert!(h.store.get_checkpoint(&checkpoint_id).unwrap().resolved);
}

#[tokio::test]
async fn test_scenario_d_reject_skips_finalize() {
    let h = Harness::new();
    let (_, checkpoint_id) = h.suspended_b().await;

    let handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Reject, "wrong quantities", "bob")
        .unwrap();
    let run = h.executor.resume(&handle).await.unwrap().run;

    assert_run_status(&run, RunStatus::ManualHandlingRequired);
    assert_eq!(run.current_stage, StageId::End);
    assert_eq!(run.revision, 8);
    assert_eq!(
        run.state.get("handoff_reason").unwrap(),
        "Rejected by bob: wrong quantities"
    );
    for skipped in ["accounting_entries", "erp_txn_id", "final_payload"] {
        assert!(run.state.get(skipped).is_none(), "{skipped} should not be set");
    }
    assert!(run.error.is_none());
}

#[tokio::test]
async fn test_cancel_ends_run_as_failed() {
    let h = Harness::new();
    let (_, checkpoint_id) = h.suspended_b().await;

    let handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Cancel, "duplicate invoice", "ops-1")
        .unwrap();
    let run = h.executor.resume(&handle).await.unwrap().run;

    assert_run_status(&run, RunStatus::Failed);
    let error = run.error.unwrap();
    assert_eq!(error["type"], "Cancelled");
    assert_eq!(error["message"], "Cancelled by ops-1: duplicate invoice");
}

#[tokio::test]
async fn test_second_resolution_is_rejected_and_changes_nothing() {
    let h = Harness::new();
    let (_, checkpoint_id) = h.suspended_b().await;

    let handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Accept, "", "alice")
        .unwrap();
    let resumed = h.executor.resume(&handle).await.unwrap().run;

    let err = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Reject, "", "mallory")
        .unwrap_err();
    assert!(matches!(err, InvoiceflowError::AlreadyResolved { .. }));
    assert_eq!(
        err.to_string(),
        format!("Review '{}' not found or already resolved", handle.review_id)
    );

    let err = h
        .queue
        .resolve(&handle.review_id, Decision::Reject, "", "mallory")
        .unwrap_err();
    assert_eq!(err.kind(), "AlreadyResolved");

    let stored = h.store.load_run(resumed.run_id).unwrap();
    assert_eq!(stored.revision, resumed.revision);
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.state.human_decision(), Some(Decision::Accept));
}

#[tokio::test]
async fn test_unknown_checkpoint_reports_already_resolved() {
    let h = Harness::new();
    let err = h
        .queue
        .resolve_by_checkpoint("ckpt-missing", Decision::Accept, "", "alice")
        .unwrap_err();
    assert_eq!(err.kind(), "AlreadyResolved");
}

#[tokio::test]
async fn test_replayed_resume_does_not_execute_again() {
    let decision = CountingStage::new(DecisionStage);
    let calls = decision.counter();
    let h = Harness::with(
        Arc::new(InMemoryStore::new()),
        StageRegistry::standard().with_stage(decision),
    );
    let (_, checkpoint_id) = h.suspended_b().await;

    let handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Accept, "ok", "alice")
        .unwrap();
    let first = h.executor.resume(&handle).await.unwrap();
    let match_calls = h.dispatcher.invocation_count("match_engine");
    let fetch_calls = h.dispatcher.invocation_count("fetch_po");
    let post_calls = h.dispatcher.invocation_count("post_to_erp");

    let replay = h.executor.resume(&handle).await.unwrap();

    assert!(replay.replayed);
    assert_eq!(replay.decision, first.decision);
    assert_eq!(replay.run.revision, first.run.revision);
    assert_eq!(h.dispatcher.invocation_count("match_engine"), match_calls);
    assert_eq!(h.dispatcher.invocation_count("fetch_po"), fetch_calls);
    assert_eq!(h.dispatcher.invocation_count("post_to_erp"), post_calls);
    // Once to suspend, once to consume the decision.
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_resolution_after_out_of_band_change_is_stale() {
    let h = Harness::new();
    let (run, checkpoint_id) = h.suspended_b().await;

    let mut moved = h.store.load_run(run.run_id).unwrap();
    moved.status = RunStatus::Running;
    moved.active_checkpoint = None;
    moved.revision += 1;
    h.store.commit_run(&moved, run.revision).unwrap();

    let err = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Accept, "", "alice")
        .unwrap_err();
    assert_eq!(err.kind(), "StaleResolution");

    let pending = h.queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1, "a stale resolution must leave the review pending");
}

#[tokio::test]
async fn test_resume_without_resolved_review_is_rejected() {
    let h = Harness::new();
    let (run, checkpoint_id) = h.suspended_b().await;
    let review = h.store.review_for_checkpoint(&checkpoint_id).unwrap();
    let unrecorded = ResumeHandle {
        run_id: run.run_id,
        checkpoint_id: checkpoint_id.clone(),
        review_id: review.review_id.clone(),
        resolution: Resolution::new(Decision::Accept, "", "mallory"),
    };

    let err = h.executor.resume(&unrecorded).await.unwrap_err();

    assert_eq!(err.kind(), "StaleResolution");
    let stored = h.store.load_run(run.run_id).unwrap();
    assert_eq!(stored.status, RunStatus::Suspended);
    assert_eq!(stored.revision, 6);
    assert!(!h.store.get_checkpoint(&checkpoint_id).unwrap().resolved);
    assert_eq!(h.queue.list_pending().unwrap().len(), 1);

    // The queue's recorded decision wins over whatever the handle carries.
    h.queue
        .resolve(&review.review_id, Decision::Reject, "wrong PO", "bob")
        .unwrap();
    let outcome = h.executor.resume(&unrecorded).await.unwrap();
    assert_run_status(&outcome.run, RunStatus::ManualHandlingRequired);
    assert_eq!(outcome.run.state.human_decision(), Some(Decision::Reject));
    assert!(h.queue.list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_with_mismatched_run_is_rejected() {
    let h = Harness::new();
    let (_, checkpoint_id) = h.suspended_b().await;
    let mut handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Accept, "", "alice")
        .unwrap();
    let run_id = handle.run_id;
    handle.run_id = Uuid::new_v4();

    let err = h.executor.resume(&handle).await.unwrap_err();

    assert_eq!(err.kind(), "StaleResolution");
    assert_eq!(h.store.load_run(run_id).unwrap().status, RunStatus::Suspended);
}

#[tokio::test]
async fn test_run_locks_are_released() {
    let h = Harness::new();
    for _ in 0..5 {
        h.process(&testing::scenario_a_invoice()).await;
    }
    assert_eq!(h.executor.tracked_locks(), 0);

    let (_, checkpoint_id) = h.suspended_b().await;
    assert_eq!(h.executor.tracked_locks(), 0);

    let handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Accept, "", "alice")
        .unwrap();
    h.executor.resume(&handle).await.unwrap();
    assert_eq!(h.executor.tracked_locks(), 0);

    let missing = h.executor.drive(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(missing.kind(), "NotFound");
    assert_eq!(h.executor.tracked_locks(), 0);
}

/// Delegates to an in-memory store but refuses to write checkpoints.
#[derive(Debug)]
struct CheckpointWriteFails {
    inner: Arc<InMemoryStore>,
}

impl RunStore for CheckpointWriteFails {
    fn insert_run(&self, run: &RunRecord) -> crate::errors::Result<()> {
        self.inner.insert_run(run)
    }

    fn load_run(&self, run_id: Uuid) -> crate::errors::Result<RunRecord> {
        self.inner.load_run(run_id)
    }

    fn list_runs(&self) -> crate::errors::Result<Vec<RunRecord>> {
        self.inner.list_runs()
    }

    fn commit_run(&self, run: &RunRecord, expected_revision: u64) -> crate::errors::Result<()> {
        self.inner.commit_run(run, expected_revision)
    }

    fn suspend_run(
        &self,
        _run: &RunRecord,
        _expected_revision: u64,
        _checkpoint: &Checkpoint,
        _review: &ReviewItem,
    ) -> crate::errors::Result<()> {
        Err(InvoiceflowError::store("checkpoint table unavailable"))
    }

    fn get_checkpoint(&self, checkpoint_id: &str) -> crate::errors::Result<Checkpoint> {
        self.inner.get_checkpoint(checkpoint_id)
    }

    fn active_checkpoint(&self, run_id: Uuid) -> crate::errors::Result<Option<Checkpoint>> {
        self.inner.active_checkpoint(run_id)
    }

    fn mark_checkpoint_resolved(&self, checkpoint_id: &str) -> crate::errors::Result<()> {
        self.inner.mark_checkpoint_resolved(checkpoint_id)
    }

    fn get_review(&self, review_id: &str) -> crate::errors::Result<ReviewItem> {
        self.inner.get_review(review_id)
    }

    fn review_for_checkpoint(&self, checkpoint_id: &str) -> crate::errors::Result<ReviewItem> {
        self.inner.review_for_checkpoint(checkpoint_id)
    }

    fn list_pending_reviews(&self) -> crate::errors::Result<Vec<ReviewItem>> {
        self.inner.list_pending_reviews()
    }

    fn resolve_review(
        &self,
        review_id: &str,
        resolution: &Resolution,
    ) -> crate::errors::Result<ReviewItem> {
        self.inner.resolve_review(review_id, resolution)
    }
}

#[tokio::test]
async fn test_failed_checkpoint_write_leaves_step_uncommitted() {
    let inner = Arc::new(InMemoryStore::new());
    let broken = Harness::with(
        Arc::new(CheckpointWriteFails {
            inner: Arc::clone(&inner),
        }),
        StageRegistry::standard(),
    );
    let run = broken.executor.submit(&testing::scenario_b_invoice()).unwrap();

    let err = broken.executor.drive(run.run_id).await.unwrap_err();

    assert!(matches!(err, InvoiceflowError::Store(_)));
    let stored = inner.load_run(run.run_id).unwrap();
    assert_run_status(&stored, RunStatus::Running);
    assert_eq!(stored.current_stage, StageId::HitlDecision);
    assert_eq!(stored.revision, 6);
    assert!(stored.active_checkpoint.is_none());
    assert!(inner.list_pending_reviews().unwrap().is_empty());
    assert!(broken.sink.events_of_type("run.suspended").is_empty());

    let healthy = Harness::with(inner.clone(), StageRegistry::standard());
    let recovered = healthy.executor.recover().await.unwrap();

    assert_eq!(recovered.len(), 1);
    assert_run_status(&recovered[0], RunStatus::Suspended);
    assert_eq!(recovered[0].revision, 6);
    assert_eq!(healthy.queue.list_pending().unwrap().len(), 1);
}

#[tokio::test]
async fn test_validation_failure_keeps_state() {
    let h = Harness::new();
    let mut invoice = testing::scenario_a_invoice();
    invoice.amount = 0.0;

    let run = h.process(&invoice).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(run.current_stage, StageId::Intake);
    assert_eq!(run.revision, 1);
    let error = run.error.as_ref().unwrap();
    assert_eq!(error["type"], "ValidationFailure");
    assert_eq!(error["stage"], "INTAKE");
    assert!(run.state.get("invoice_payload").is_some());
    assert_eq!(run.state.error_log.len(), 1);
    assert_eq!(run.state.audit_log.last().unwrap().action, "stage_failed");
}

#[tokio::test]
async fn test_exhausted_transient_failures_fail_the_run() {
    let h = Harness::new();
    h.external.fail_transiently("fetch_po", 10);

    let run = h.process(&testing::scenario_a_invoice()).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(run.current_stage, StageId::Retrieve);
    let error = run.error.as_ref().unwrap();
    assert_eq!(error["type"], "StageFailure");
    assert_eq!(error["stage"], "RETRIEVE");
    assert_eq!(error["cause"]["type"], "TransientBackendFailure");
    assert_eq!(error["cause"]["operation"], "fetch_po");
    assert_eq!(error["cause"]["attempts"], 3);
    assert_eq!(h.dispatcher.invocation_count("fetch_po"), 3);
    assert!(run.state.get("parsed_invoice").is_some());
    assert!(run.state.get("matched_pos").is_none());

    let failed = h.sink.events_of_type("run.failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage, StageId::Retrieve);
}

#[tokio::test]
async fn test_transient_failures_within_budget_are_retried() {
    let h = Harness::new();
    h.external.fail_transiently("post_to_erp", 2);

    let run = h.process(&testing::scenario_a_invoice()).await;

    assert_run_status(&run, RunStatus::Completed);
    assert_eq!(h.dispatcher.invocation_count("post_to_erp"), 3);
}

#[tokio::test]
async fn test_stage_failure_stops_downstream_stages() {
    let h = Harness::with(
        Arc::new(InMemoryStore::new()),
        StageRegistry::standard()
            .with_stage(FailingStage::new(StageId::Approve, "policy engine down")),
    );
    let run = h.process(&testing::scenario_a_invoice()).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(run.current_stage, StageId::Approve);
    assert!(run.state.get("accounting_entries").is_some());
    assert!(run.state.get("erp_txn_id").is_none());
    assert_eq!(h.dispatcher.invocation_count("post_to_erp"), 0);
    assert_eq!(run.error.unwrap()["type"], "StageFailure");
}

#[tokio::test]
async fn test_events_follow_committed_revisions() {
    let h = Harness::new();
    let run = h.executor.submit(&testing::scenario_a_invoice()).unwrap();
    let mut subscription = h.executor.events().subscribe(run.run_id);
    let run = h.executor.drive(run.run_id).await.unwrap();

    let events = subscription.drain();
    assert_revisions_increasing(&events);
    let completed: Vec<_> = events.iter().filter(|e| e.event_type == "stage.completed").collect();
    assert_eq!(completed.len(), 10);
    assert_eq!(completed[0].stage, StageId::Understand);
    assert_eq!(completed[0].revision, 1);

    let last = events.last().unwrap();
    assert_eq!(last.event_type, "run.completed");
    assert_eq!(last.status, RunStatus::Completed);
    assert_eq!(last.revision, run.revision);

    let all = h.sink.events_for(run.run_id);
    assert_eq!(all.first().unwrap().event_type, "run.submitted");
    assert_revisions_increasing(&all);
}

#[tokio::test]
async fn test_suspend_and_resume_events() {
    let h = Harness::new();
    let (run, checkpoint_id) = h.suspended_b().await;
    let handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Accept, "", "alice")
        .unwrap();
    h.executor.resume(&handle).await.unwrap();

    let events = h.sink.events_for(run.run_id);
    assert_revisions_increasing(&events);
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    let suspended = types.iter().position(|t| *t == "run.suspended").unwrap();
    let resumed = types.iter().position(|t| *t == "run.resumed").unwrap();
    assert!(suspended < resumed);
    assert_eq!(events[suspended].summary["checkpoint_id"], checkpoint_id.as_str());
    assert_eq!(types.last(), Some(&"run.completed"));
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let h = Harness::new();
    let invoices: Vec<InvoicePayload> = (0..8)
        .map(|i| {
            let mut invoice = if i % 2 == 0 {
                testing::scenario_a_invoice()
            } else {
                testing::scenario_b_invoice()
            };
            invoice.invoice_id = format!("INV-{i:03}");
            invoice
        })
        .collect();
    let runs: Vec<RunRecord> = invoices
        .iter()
        .map(|invoice| h.executor.submit(invoice).unwrap())
        .collect();

    let driven = join_all(runs.iter().map(|run| {
        let executor = Arc::clone(&h.executor);
        let run_id = run.run_id;
        async move { executor.drive(run_id).await.unwrap() }
    }))
    .await;

    let completed = driven.iter().filter(|r| r.status == RunStatus::Completed).count();
    let suspended = driven.iter().filter(|r| r.status == RunStatus::Suspended).count();
    assert_eq!(completed, 4);
    assert_eq!(suspended, 4);
    assert_eq!(h.queue.list_pending().unwrap().len(), 4);
}

#[tokio::test]
async fn test_recover_drives_interrupted_runs() {
    let h = Harness::new();
    let interrupted = h.executor.submit(&testing::scenario_a_invoice()).unwrap();
    let (parked, _) = h.suspended_b().await;

    let recovered = h.executor.recover().await.unwrap();

    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].run_id, interrupted.run_id);
    assert_run_status(&recovered[0], RunStatus::Completed);
    assert_eq!(h.store.load_run(parked.run_id).unwrap().status, RunStatus::Suspended);
}

#[tokio::test]
async fn test_recover_consumes_recorded_resolution() {
    let h = Harness::new();
    let (run, checkpoint_id) = h.suspended_b().await;
    h.queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Reject, "", "bob")
        .unwrap();

    let recovered = h.executor.recover().await.unwrap();

    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].run_id, run.run_id);
    assert_run_status(&recovered[0], RunStatus::ManualHandlingRequired);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_resume_after_restart_with_sqlite() {
    use crate::store::SqliteStore;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");

    let (run_id, checkpoint_id) = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let h = Harness::with(store, StageRegistry::standard());
        let (run, checkpoint_id) = h.suspended_b().await;
        (run.run_id, checkpoint_id)
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let h = Harness::with(store, StageRegistry::standard());
    let pending = h.queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].run_id, run_id);

    let handle = h
        .queue
        .resolve_by_checkpoint(&checkpoint_id, Decision::Accept, "", "alice")
        .unwrap();
    let run = h.executor.resume(&handle).await.unwrap().run;
    assert_run_status(&run, RunStatus::Completed);
    assert_eq!(h.store.load_run(run_id).unwrap().revision, run.revision);
}
