//! Durable stage-graph executor.
//!
//! Each step runs one stage against a snapshot of the state bag, merges the
//! validated result, advances the stage pointer and commits the run with a
//! revision compare-and-swap. Nothing is written for a step whose commit
//! fails. A per-run async mutex keeps one writer per run inside this
//! process; the store's revision check catches any other.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::graph::{next_stage, status_after};
use crate::context::{StageContext, StageServices, StateBag};
use crate::core::{AuditEntry, RunStatus, StageId, StageOutcome, StageResult, TransitionEvent};
use crate::document::InvoicePayload;
use crate::errors::{InvoiceflowError, Result, StageFailureError};
use crate::events::EventBus;
use crate::observability::{SpanTimer, StageSpanAttributes};
use crate::stages::{paused_reason, StageRegistry};
use crate::store::{
    ensure_resolvable, CheckpointStore, ResumeHandle, ReviewContext, RunRecord, RunStore,
};

/// Result of [`Executor::resume`].
#[derive(Debug, Clone)]
pub struct ResumeOutcome {
    /// The run after resuming.
    pub run: RunRecord,
    /// The decision stage's result; `None` if the decision stage failed.
    pub decision: Option<StageResult>,
    /// True when the decision had already been consumed and nothing ran.
    pub replayed: bool,
}

/// What one step did.
enum Step {
    Committed(RunRecord),
    Suspended(RunRecord),
    Failed(RunRecord),
}

impl Step {
    fn into_run(self) -> RunRecord {
        match self {
            Self::Committed(run) | Self::Suspended(run) | Self::Failed(run) => run,
        }
    }
}

/// Drives runs through the invoice stage graph.
#[derive(Debug)]
pub struct Executor {
    store: Arc<dyn RunStore>,
    checkpoints: CheckpointStore,
    stages: StageRegistry,
    services: StageServices,
    events: EventBus,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        store: Arc<dyn RunStore>,
        stages: StageRegistry,
        services: StageServices,
        events: EventBus,
    ) -> Self {
        Self {
            checkpoints: CheckpointStore::new(Arc::clone(&store)),
            store,
            stages,
            services,
            events,
            locks: DashMap::new(),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// The event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Services handed to stages.
    #[must_use]
    pub fn services(&self) -> &StageServices {
        &self.services
    }

    fn threshold(&self) -> f64 {
        self.services.config.match_threshold
    }

    fn lock_for(&self, run_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(run_id).or_default().value())
    }

    /// Drops the run's lock once no caller holds or waits on it.
    fn release(&self, run_id: Uuid) {
        self.locks
            .remove_if(&run_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Creates a run at `START` for `invoice`.
    ///
    /// # Errors
    ///
    /// Fails if the run cannot be stored.
    pub fn submit(&self, invoice: &InvoicePayload) -> Result<RunRecord> {
        let run = RunRecord::new(Uuid::new_v4(), StateBag::with_invoice(invoice)?);
        self.store.insert_run(&run)?;
        tracing::info!(
            run_id = %run.run_id,
            invoice_id = %invoice.invoice_id,
            "Run submitted"
        );
        self.events.publish(TransitionEvent::new(
            "run.submitted",
            run.run_id,
            run.current_stage,
            run.status,
            run.revision,
        ));
        Ok(run)
    }

    /// Runs stages until the run completes, fails or suspends.
    ///
    /// Stage errors end the run and are recorded on it; only store errors
    /// are returned.
    ///
    /// # Errors
    ///
    /// Returns store and revision-conflict errors. The step that hit them
    /// is not committed.
    pub async fn drive(&self, run_id: Uuid) -> Result<RunRecord> {
        let outcome = {
            let lock = self.lock_for(run_id);
            let _guard = lock.lock().await;
            match self.store.load_run(run_id) {
                Ok(run) => self.drive_locked(run).await,
                Err(err) => Err(err),
            }
        };
        self.release(run_id);
        outcome
    }

    async fn drive_locked(&self, mut run: RunRecord) -> Result<RunRecord> {
        while run.status == RunStatus::Running && run.current_stage != StageId::End {
            match self.step(run).await? {
                Step::Committed(next) => run = next,
                step @ (Step::Suspended(_) | Step::Failed(_)) => return Ok(step.into_run()),
            }
        }
        Ok(run)
    }

    async fn step(&self, run: RunRecord) -> Result<Step> {
        let stage = match run.current_stage {
            StageId::Start => next_stage(StageId::Start, &run.state, self.threshold()),
            other => other,
        };
        let ctx = StageContext::new(
            run.run_id,
            stage,
            run.revision,
            run.state.clone(),
            self.services.clone(),
        );

        match self.execute(&ctx).await {
            Ok(result) if result.outcome == StageOutcome::AwaitDecision => {
                self.suspend(run, stage).map(Step::Suspended)
            }
            Ok(result) => self.commit(run, stage, result, None).map(Step::Committed),
            Err(err) if err.is_stage_level() => self.fail(run, stage, &err).map(Step::Failed),
            Err(err) => Err(err),
        }
    }

    /// Executes one stage and validates its result.
    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let timer = SpanTimer::start();
        let attrs = StageSpanAttributes::new(ctx.run_id, ctx.stage, ctx.revision);

        let outcome = match self.stages.get(ctx.stage) {
            Ok(stage) => stage.execute(ctx).await.and_then(|result| {
                result.validate_schema()?;
                Ok(result)
            }),
            Err(err) => Err(err),
        };

        let attrs = attrs.with_duration_ms(timer.elapsed_ms());
        match &outcome {
            Ok(result) if result.outcome == StageOutcome::AwaitDecision => {
                attrs.with_outcome("await_decision").log();
            }
            Ok(_) => attrs.with_outcome("proceed").log(),
            Err(err) => attrs.with_outcome("failed").with_error(err.to_string()).log(),
        }
        outcome
    }

    /// Merges `result`, advances the pointer and commits a new revision.
    fn commit(
        &self,
        mut run: RunRecord,
        stage: StageId,
        result: StageResult,
        consumed_checkpoint: Option<&str>,
    ) -> Result<RunRecord> {
        let expected = run.revision;
        run.state.merge(&result);
        let status = status_after(stage, &run.state);

        if let Some(checkpoint_id) = consumed_checkpoint {
            run.consumed_decisions
                .insert(checkpoint_id.to_string(), result.clone());
            run.active_checkpoint = None;
        }
        if stage == StageId::ManualHandoff && status == RunStatus::Failed {
            run.error = Some(json!({
                "type": "Cancelled",
                "stage": stage,
                "message": run.state.get("handoff_reason"),
                "operator_id": run.state.get("reviewer_id"),
            }));
        }

        run.current_stage = next_stage(stage, &run.state, self.threshold());
        run.status = status;
        run.revision += 1;
        run.updated_at = Utc::now();
        self.store.commit_run(&run, expected)?;

        self.events.publish(
            TransitionEvent::new(
                "stage.completed",
                run.run_id,
                run.current_stage,
                run.status,
                run.revision,
            )
            .with_summary(result.summary()),
        );
        if status.is_terminal() {
            tracing::info!(
                run_id = %run.run_id,
                stage = %stage,
                status = %status,
                revision = run.revision,
                "Run finished"
            );
            self.events.publish(TransitionEvent::new(
                format!("run.{status}"),
                run.run_id,
                run.current_stage,
                run.status,
                run.revision,
            ));
        }
        Ok(run)
    }

    /// Ends the run as failed at `stage`, keeping its state bag.
    fn fail(
        &self,
        mut run: RunRecord,
        stage: StageId,
        err: &InvoiceflowError,
    ) -> Result<RunRecord> {
        let expected = run.revision;
        let mut detail = json!(err.to_dict());
        detail["stage"] = json!(stage);

        run.state.record_error(stage, err);
        run.state
            .audit_log
            .push(AuditEntry::new(stage, "stage_failed", detail.clone()));
        run.error = Some(detail);
        run.current_stage = stage;
        run.status = RunStatus::Failed;
        run.revision += 1;
        run.updated_at = Utc::now();
        self.store.commit_run(&run, expected)?;

        tracing::warn!(
            run_id = %run.run_id,
            stage = %stage,
            error_kind = err.kind(),
            error = %err,
            "Run failed"
        );
        self.events.publish(
            TransitionEvent::new("run.failed", run.run_id, stage, run.status, run.revision)
                .with_summary(json!({ "error": err.kind(), "message": err.to_string() })),
        );
        Ok(run)
    }

    /// Parks the run at `stage`: writes the checkpoint and its review item.
    /// The revision is not incremented.
    fn suspend(&self, mut run: RunRecord, stage: StageId) -> Result<RunRecord> {
        let allocated = |key: &str, prefix: &str| {
            run.state
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| format!("{prefix}-{}", Uuid::new_v4()), str::to_string)
        };
        let checkpoint_id = allocated("hitl_checkpoint_id", "ckpt");
        let review_id = allocated("review_id", "review");
        let reason = run
            .state
            .get("paused_reason")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| paused_reason(&run.state, self.threshold()), str::to_string);
        let context = review_context(&run.state, stage)?;

        run.current_stage = stage;
        let (checkpoint, review) =
            self.checkpoints
                .create(&run, checkpoint_id, review_id, reason, context)?;
        run.status = RunStatus::Suspended;
        run.active_checkpoint = Some(checkpoint.checkpoint_id.clone());

        self.events.publish(
            TransitionEvent::new("run.suspended", run.run_id, stage, run.status, run.revision)
                .with_summary(json!({
                    "checkpoint_id": checkpoint.checkpoint_id,
                    "review_id": review.review_id,
                    "reason": checkpoint.reason,
                })),
        );
        Ok(run)
    }

    /// Resumes a run after its review was resolved.
    ///
    /// The decision stage consumes the resolution exactly once. Calling
    /// this again for the same checkpoint returns the stored result without
    /// running anything.
    ///
    /// # Errors
    ///
    /// Returns `StaleResolution` if the run is no longer parked at the
    /// checkpoint or its review has not been resolved, a store error if the
    /// snapshot fails its digest check, and store errors from the commits.
    pub async fn resume(&self, handle: &ResumeHandle) -> Result<ResumeOutcome> {
        let outcome = {
            let lock = self.lock_for(handle.run_id);
            let _guard = lock.lock().await;
            self.resume_locked(handle).await
        };
        self.release(handle.run_id);
        outcome
    }

    async fn resume_locked(&self, handle: &ResumeHandle) -> Result<ResumeOutcome> {
        let checkpoint = self.checkpoints.get(&handle.checkpoint_id)?;
        if checkpoint.run_id != handle.run_id {
            return Err(InvoiceflowError::stale(
                &checkpoint.checkpoint_id,
                format!("checkpoint belongs to run {}", checkpoint.run_id),
            ));
        }
        let mut run = self.store.load_run(checkpoint.run_id)?;

        if let Some(cached) = run.consumed_decisions.get(&checkpoint.checkpoint_id) {
            tracing::info!(
                run_id = %run.run_id,
                checkpoint_id = %checkpoint.checkpoint_id,
                "Decision already consumed, replaying stored result"
            );
            let decision = Some(cached.clone());
            return Ok(ResumeOutcome {
                run,
                decision,
                replayed: true,
            });
        }

        ensure_resolvable(&run, &checkpoint)?;
        let review = self.store.review_for_checkpoint(&checkpoint.checkpoint_id)?;
        let resolution = review
            .resolution
            .clone()
            .filter(|_| !review.is_pending())
            .ok_or_else(|| {
                InvoiceflowError::stale(
                    &checkpoint.checkpoint_id,
                    format!("review '{}' has not been resolved", review.review_id),
                )
            })?;
        run.state = checkpoint.restore()?;
        self.checkpoints.mark_resolved(&checkpoint.checkpoint_id)?;

        tracing::info!(
            run_id = %run.run_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            decision = %resolution.decision,
            "Resuming run"
        );
        self.events.publish(
            TransitionEvent::new(
                "run.resumed",
                run.run_id,
                checkpoint.stage,
                RunStatus::Running,
                run.revision,
            )
            .with_summary(json!({
                "checkpoint_id": checkpoint.checkpoint_id,
                "decision": resolution.decision,
            })),
        );

        let ctx = StageContext::new(
            run.run_id,
            checkpoint.stage,
            run.revision,
            run.state.clone(),
            self.services.clone(),
        )
        .with_resolution(resolution);

        let result = match self.execute(&ctx).await {
            Ok(result) if result.outcome == StageOutcome::AwaitDecision => {
                Err(StageFailureError::new(
                    checkpoint.stage,
                    "decision stage ignored the resolution",
                )
                .into())
            }
            other => other,
        };

        match result {
            Ok(result) => {
                let run = self.commit(
                    run,
                    checkpoint.stage,
                    result.clone(),
                    Some(checkpoint.checkpoint_id.as_str()),
                )?;
                let run = self.drive_locked(run).await?;
                Ok(ResumeOutcome {
                    run,
                    decision: Some(result),
                    replayed: false,
                })
            }
            Err(err) if err.is_stage_level() => {
                run.active_checkpoint = None;
                let run = self.fail(run, checkpoint.stage, &err)?;
                Ok(ResumeOutcome {
                    run,
                    decision: None,
                    replayed: false,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Re-drives runs interrupted mid-flight.
    ///
    /// Running runs continue from their last committed revision. Suspended
    /// runs whose review was resolved but never consumed are resumed; other
    /// suspended runs stay parked.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn recover(&self) -> Result<Vec<RunRecord>> {
        let mut recovered = Vec::new();
        for run in self.store.list_runs()? {
            match run.status {
                RunStatus::Running => {
                    tracing::info!(
                        run_id = %run.run_id,
                        stage = %run.current_stage,
                        "Recovering run"
                    );
                    recovered.push(self.drive(run.run_id).await?);
                }
                RunStatus::Suspended => {
                    if let Some(handle) = self.pending_resume(&run)? {
                        tracing::info!(run_id = %run.run_id, "Recovering resolved checkpoint");
                        recovered.push(self.resume(&handle).await?.run);
                    }
                }
                _ => {}
            }
        }
        Ok(recovered)
    }

    fn pending_resume(&self, run: &RunRecord) -> Result<Option<ResumeHandle>> {
        let Some(checkpoint_id) = run.active_checkpoint.as_deref() else {
            return Ok(None);
        };
        let review = self.store.review_for_checkpoint(checkpoint_id)?;
        Ok(review.resolution.map(|resolution| ResumeHandle {
            run_id: run.run_id,
            checkpoint_id: checkpoint_id.to_string(),
            review_id: review.review_id,
            resolution,
        }))
    }
}

/// Document identifiers shown to the reviewer.
fn review_context(state: &StateBag, stage: StageId) -> Result<ReviewContext> {
    let invoice = state.invoice(stage)?;
    let po_number = state
        .get("matched_pos")
        .and_then(|pos| pos[0]["po_number"].as_str())
        .map(str::to_string)
        .or_else(|| invoice.po_number.clone());
    Ok(ReviewContext {
        invoice_id: invoice.invoice_id,
        vendor_name: invoice.vendor_name,
        amount: invoice.amount,
        currency: invoice.currency,
        po_number,
        match_score: state.match_score(),
    })
}
