//! Stage trait and the invoice pipeline's stages.
//!
//! Stages are the units of work the executor drives. Each one reads a
//! snapshot of the state bag and returns a [`StageResult`] carrying exactly
//! its declared output keys; it never writes the bag itself.

mod finalize;
mod ingest;
mod matching;
mod review;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::context::StageContext;
use crate::core::{StageId, StageResult};
use crate::errors::{InvoiceflowError, Result};

pub use finalize::{ApproveStage, CompleteStage, NotifyStage, PostingStage, ReconcileStage};
pub use ingest::{IntakeStage, PrepareStage, UnderstandStage};
pub use matching::{round_score, MatchStage, RetrieveStage};
pub use review::{paused_reason, CheckpointStage, DecisionStage, ManualHandoffStage};

/// A pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// The stage this implementation runs.
    fn id(&self) -> StageId;

    /// Executes the stage.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed input, and a stage or
    /// transient-backend failure when a routed operation fails.
    async fn execute(&self, ctx: &StageContext) -> Result<StageResult>;
}

/// Stage implementations keyed by id.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: HashMap<StageId, Arc<dyn Stage>>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl StageRegistry {
    /// The thirteen invoice stages.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .with_stage(IntakeStage)
            .with_stage(UnderstandStage)
            .with_stage(PrepareStage)
            .with_stage(RetrieveStage)
            .with_stage(MatchStage)
            .with_stage(CheckpointStage)
            .with_stage(DecisionStage)
            .with_stage(ReconcileStage)
            .with_stage(ApproveStage)
            .with_stage(PostingStage)
            .with_stage(NotifyStage)
            .with_stage(CompleteStage)
            .with_stage(ManualHandoffStage)
    }

    /// A registry with no stages.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }

    /// Registers a stage, replacing any previous one with the same id.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.insert(stage.id(), Arc::new(stage));
        self
    }

    /// Looks up a stage.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no implementation is registered.
    pub fn get(&self, id: StageId) -> Result<Arc<dyn Stage>> {
        self.stages
            .get(&id)
            .cloned()
            .ok_or_else(|| InvoiceflowError::not_found("stage", id.as_str()))
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True if no stage is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Reads a field of a routed operation's response.
fn response_field<T: serde::de::DeserializeOwned>(
    stage: StageId,
    operation: &str,
    response: &serde_json::Value,
    key: &str,
) -> Result<T> {
    response
        .get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| {
            crate::errors::StageFailureError::new(
                stage,
                format!("{operation} returned no usable '{key}'"),
            )
            .into()
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::config::EngineConfig;
    use crate::context::{StageContext, StageServices, StateBag};
    use crate::core::{StageId, StageResult};
    use crate::surfaces::{Dispatcher, InternalSurface, SimulatedExternalSurface};
    use crate::testing;

    pub fn services(external: SimulatedExternalSurface) -> StageServices {
        let config = EngineConfig::default();
        let dispatcher = Dispatcher::new(
            Default::default(),
            Arc::new(InternalSurface::new(config.match_config(), config.approval_policy())),
            Arc::new(external),
            crate::pipeline::retry::RetryConfig::immediate(3),
        );
        StageServices::new(Arc::new(dispatcher), Arc::default(), Arc::new(config))
    }

    pub fn context(stage: StageId, state: StateBag, services: &StageServices) -> StageContext {
        StageContext::new(Uuid::new_v4(), stage, 0, state, services.clone())
    }

    /// Runs `stages` in order over the scenario A invoice, merging results.
    pub async fn run_through(stages: &[StageId], services: &StageServices) -> StateBag {
        let registry = super::StageRegistry::standard();
        let mut state = StateBag::with_invoice(&testing::scenario_a_invoice()).unwrap();
        for id in stages {
            let result: StageResult = registry
                .get(*id)
                .unwrap()
                .execute(&context(*id, state.clone(), services))
                .await
                .unwrap();
            result.validate_schema().unwrap();
            state.merge(&result);
        }
        state
    }
}
