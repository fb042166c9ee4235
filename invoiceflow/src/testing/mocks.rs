//! Stage doubles.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::StageContext;
use crate::core::{StageId, StageResult};
use crate::errors::{Result, StageFailureError};
use crate::stages::Stage;

/// Wraps a stage and counts its executions.
#[derive(Debug, Clone)]
pub struct CountingStage {
    inner: Arc<dyn Stage>,
    calls: Arc<AtomicUsize>,
}

impl CountingStage {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: impl Stage + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter, readable after the stage is moved into a registry.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Number of executions so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for CountingStage {
    fn id(&self) -> StageId {
        self.inner.id()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(ctx).await
    }
}

/// A stage that always fails.
#[derive(Debug, Clone)]
pub struct FailingStage {
    id: StageId,
    error: String,
}

impl FailingStage {
    /// Creates a stage that fails with `error`.
    #[must_use]
    pub fn new(id: StageId, error: impl Into<String>) -> Self {
        Self {
            id,
            error: error.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn id(&self) -> StageId {
        self.id
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageResult> {
        Err(StageFailureError::new(self.id, self.error.clone()).into())
    }
}
