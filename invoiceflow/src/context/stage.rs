//! Per-invocation context handed to a stage.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

use super::StateBag;
use crate::config::EngineConfig;
use crate::core::StageId;
use crate::document::InvoicePayload;
use crate::errors::{InvoiceflowError, Result, StageFailureError};
use crate::routing::{SelectionContext, SelectionRecord, ToolSelector};
use crate::store::Resolution;
use crate::surfaces::{Dispatcher, OperationRequest};

/// Shared services stages use. Read-mostly; shared by every run.
#[derive(Debug, Clone)]
pub struct StageServices {
    /// Routes and runs operations.
    pub dispatcher: Arc<Dispatcher>,
    /// Picks backends.
    pub selector: Arc<ToolSelector>,
    /// Engine configuration.
    pub config: Arc<EngineConfig>,
}

impl StageServices {
    /// Bundles the services.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, selector: Arc<ToolSelector>, config: Arc<EngineConfig>) -> Self {
        Self {
            dispatcher,
            selector,
            config,
        }
    }
}

/// Input to one stage invocation: a read-only copy of the state bag plus
/// the services.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The run.
    pub run_id: Uuid,
    /// The stage being executed.
    pub stage: StageId,
    /// Run revision the stage reads from.
    pub revision: u64,
    /// Snapshot of the state bag.
    pub state: StateBag,
    /// Decision delivered on resume, for the review stage.
    pub resolution: Option<Resolution>,
    services: StageServices,
}

impl StageContext {
    /// Creates a context.
    #[must_use]
    pub fn new(run_id: Uuid, stage: StageId, revision: u64, state: StateBag, services: StageServices) -> Self {
        Self {
            run_id,
            stage,
            revision,
            state,
            resolution: None,
            services,
        }
    }

    /// Attaches a resolution.
    #[must_use]
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// The submitted invoice.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the invoice is missing or malformed.
    pub fn invoice(&self) -> Result<InvoicePayload> {
        Ok(self.state.invoice(self.stage)?)
    }

    /// Reads an upstream output.
    ///
    /// # Errors
    ///
    /// Returns a stage failure if the key is absent or has the wrong shape.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.state.get_as(key).ok_or_else(|| {
            StageFailureError::new(self.stage, format!("missing or malformed upstream output '{key}'"))
                .into()
        })
    }

    /// Selects a backend for a capability.
    #[must_use]
    pub fn select(&self, capability: &str) -> SelectionRecord {
        self.services
            .selector
            .select(capability, SelectionContext::new(self.run_id, self.stage))
    }

    /// Routes and runs an operation, on the selected backend if one is given.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher failures.
    pub async fn dispatch(
        &self,
        operation: &str,
        selection: Option<&SelectionRecord>,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, InvoiceflowError> {
        let mut request = OperationRequest::new(operation, self.run_id, self.stage).with_params(params);
        if let Some(selection) = selection {
            request = request.with_backend(selection.selected.clone());
        }
        self.services.dispatcher.dispatch(request).await
    }
}
