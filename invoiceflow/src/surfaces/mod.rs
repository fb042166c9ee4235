//! Execution surfaces for routed operations.
//!
//! Stages never call a backend directly. They hand an [`OperationRequest`]
//! to the [`Dispatcher`], which asks the router for a target and invokes
//! the matching surface with retry.

mod dispatcher;
mod external;
mod internal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;
use uuid::Uuid;

use crate::core::StageId;
use crate::routing::ExecutionTarget;

pub use dispatcher::Dispatcher;
pub use external::SimulatedExternalSurface;
pub use internal::{
    build_accounting_entries, compute_flags, normalize_vendor_name, ApprovalDecision,
    ApprovalPolicy, InternalSurface,
};

/// Failure reported by a surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Worth retrying (timeouts, throttling).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying will not help.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl BackendError {
    /// Returns true for [`BackendError::Transient`].
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One routed operation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Operation name, as known to the router.
    pub operation: String,
    /// Backend chosen by the tool selector, if the operation has a capability.
    pub backend: Option<String>,
    /// Operation parameters.
    pub params: serde_json::Value,
    /// Run the call is made for.
    pub run_id: Uuid,
    /// Stage the call is made from.
    pub stage: StageId,
}

impl OperationRequest {
    /// Creates a request with no backend and null params.
    #[must_use]
    pub fn new(operation: impl Into<String>, run_id: Uuid, stage: StageId) -> Self {
        Self {
            operation: operation.into(),
            backend: None,
            params: serde_json::Value::Null,
            run_id,
            stage,
        }
    }

    /// Sets the backend.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Sets the params.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Reads and deserializes one parameter.
    ///
    /// # Errors
    ///
    /// Returns a permanent error if the parameter is missing or malformed.
    pub fn param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, BackendError> {
        let value = self
            .params
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::Permanent(format!("{}: missing param '{key}'", self.operation)))?;
        serde_json::from_value(value).map_err(|e| {
            BackendError::Permanent(format!("{}: bad param '{key}': {e}", self.operation))
        })
    }

    /// Reads an optional parameter; null counts as absent.
    ///
    /// # Errors
    ///
    /// Returns a permanent error if the parameter is present but malformed.
    pub fn optional_param<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, BackendError> {
        match self.params.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(_) => self.param(key).map(Some),
        }
    }

    /// Backend name, or `"default"` when none was selected.
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.as_deref().unwrap_or("default")
    }

    /// True when the selected backend is a placeholder.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.backend
            .as_deref()
            .is_some_and(|b| b.ends_with(":placeholder"))
    }
}

/// A place where routed operations run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionSurface: Send + Sync + Debug {
    /// Which routing target this surface serves.
    fn target(&self) -> ExecutionTarget;

    /// Runs one operation.
    async fn invoke(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError>;
}
