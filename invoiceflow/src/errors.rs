//! Error types for the invoiceflow executor.
//!
//! The taxonomy separates failures that end a run (validation, stage
//! failures) from failures that are surfaced to the caller without changing
//! run state (store errors, resolution conflicts).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::{RunStatus, StageId};

/// Result alias used throughout the crate.
pub type Result<T, E = InvoiceflowError> = std::result::Result<T, E>;

/// The main error type for invoiceflow operations.
#[derive(Debug, Clone, Error)]
pub enum InvoiceflowError {
    /// Malformed input to a stage.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A routed operation kept failing after the configured retries.
    #[error("Transient backend failure in '{operation}' after {attempts} attempt(s): {message}")]
    TransientBackend {
        /// The operation that failed.
        operation: String,
        /// Number of attempts made.
        attempts: usize,
        /// Last error message.
        message: String,
    },

    /// A stage failed; the run is terminated.
    #[error("{0}")]
    StageFailure(#[from] StageFailureError),

    /// A review was already resolved, or never existed.
    #[error("Review '{id}' not found or already resolved")]
    AlreadyResolved {
        /// The review or checkpoint identifier.
        id: String,
    },

    /// The run is no longer suspended at the checkpoint being resolved.
    #[error("Stale resolution for checkpoint '{checkpoint_id}': {reason}")]
    StaleResolution {
        /// The checkpoint identifier.
        checkpoint_id: String,
        /// Why the resolution is stale.
        reason: String,
    },

    /// The run already has an unresolved checkpoint.
    #[error("Run '{run_id}' already has an active checkpoint '{checkpoint_id}'")]
    ActiveCheckpointExists {
        /// The run identifier.
        run_id: String,
        /// The active checkpoint.
        checkpoint_id: String,
    },

    /// An entity was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind ("run", "checkpoint", "review").
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Another writer committed the run first.
    #[error("Revision conflict for run '{run_id}': expected {expected}, found {found}")]
    RevisionConflict {
        /// The run identifier.
        run_id: String,
        /// Revision the writer based its change on.
        expected: u64,
        /// Revision actually stored.
        found: u64,
    },

    /// The run is not in a state that allows the requested operation.
    #[error("Run '{run_id}' is {status} at stage {stage}: {message}")]
    InvalidRunState {
        /// The run identifier.
        run_id: String,
        /// Current status.
        status: RunStatus,
        /// Current stage.
        stage: StageId,
        /// Detail.
        message: String,
    },

    /// The durable store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl InvoiceflowError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Creates a store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a stale-resolution error.
    #[must_use]
    pub fn stale(checkpoint_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StaleResolution {
            checkpoint_id: checkpoint_id.into(),
            reason: reason.into(),
        }
    }

    /// Short, stable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationFailure",
            Self::TransientBackend { .. } => "TransientBackendFailure",
            Self::StageFailure(_) => "StageFailure",
            Self::AlreadyResolved { .. } => "AlreadyResolved",
            Self::StaleResolution { .. } => "StaleResolution",
            Self::ActiveCheckpointExists { .. } => "ActiveCheckpointExists",
            Self::NotFound { .. } => "NotFound",
            Self::RevisionConflict { .. } => "ConcurrencyConflict",
            Self::InvalidRunState { .. } => "InvalidRunState",
            Self::Store(_) => "StoreError",
            Self::Serialization(_) => "SerializationError",
            Self::Config(_) => "ConfigError",
        }
    }

    /// Returns true for errors raised by stage execution. These end the run
    /// instead of propagating to the caller.
    #[must_use]
    pub fn is_stage_level(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::TransientBackend { .. } | Self::StageFailure(_)
        )
    }

    /// Converts to a dictionary representation for the audit trail.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::Validation(err) => {
                map.insert("fields".to_string(), serde_json::json!(err.fields));
            }
            Self::TransientBackend {
                operation,
                attempts,
                ..
            } => {
                map.insert("operation".to_string(), serde_json::json!(operation));
                map.insert("attempts".to_string(), serde_json::json!(attempts));
            }
            Self::StageFailure(err) => {
                map.insert("stage".to_string(), serde_json::json!(err.stage));
                if let Some(cause) = &err.cause {
                    map.insert("cause".to_string(), serde_json::json!(cause.to_dict()));
                }
            }
            _ => {}
        }

        map
    }
}

impl From<serde_json::Error> for InvoiceflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for InvoiceflowError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// A single field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field (e.g. `line_items[1].qty`).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    /// Creates a new field error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a stage receives malformed input.
#[derive(Debug, Clone, Error)]
#[error("Validation failed at {stage}: {}", summarize(fields))]
pub struct ValidationError {
    /// The stage that rejected its input.
    pub stage: StageId,
    /// Individual field problems.
    pub fields: Vec<FieldError>,
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{} {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Creates a validation error for a stage.
    #[must_use]
    pub fn new(stage: StageId, fields: Vec<FieldError>) -> Self {
        Self { stage, fields }
    }

    /// Creates a validation error with a single field.
    #[must_use]
    pub fn single(stage: StageId, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, vec![FieldError::new(field, message)])
    }
}

/// Error raised when a stage fails for a non-validation reason.
#[derive(Debug, Clone, Error)]
#[error("Stage {stage} failed: {message}")]
pub struct StageFailureError {
    /// The stage that failed.
    pub stage: StageId,
    /// The failure detail.
    pub message: String,
    /// The error this failure escalated from.
    pub cause: Option<Box<InvoiceflowError>>,
}

impl StageFailureError {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches the underlying error.
    #[must_use]
    pub fn with_cause(mut self, cause: InvoiceflowError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}
