//! Execution-target routing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Where an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTarget {
    /// Local, no outside-system dependency.
    Internal,
    /// Touches an outside system.
    External,
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Operations handled without external dependencies.
pub const INTERNAL_OPERATIONS: &[&str] = &[
    "validate_schema",
    "parse_line_items",
    "normalize_vendor",
    "compute_flags",
    "match_engine",
    "build_accounting_entries",
    "apply_policy",
    "finalize_workflow",
];

/// Operations that reach outside systems.
pub const EXTERNAL_OPERATIONS: &[&str] = &[
    "persist_raw",
    "ocr_extract",
    "enrich_vendor",
    "fetch_po",
    "fetch_grn",
    "create_checkpoint",
    "post_to_erp",
    "schedule_payment",
    "send_email",
];

/// Static classification of operation names.
///
/// Unknown operations route to [`ExecutionTarget::Internal`].
#[derive(Debug, Clone)]
pub struct ExecutionRouter {
    table: HashMap<String, ExecutionTarget>,
}

impl Default for ExecutionRouter {
    fn default() -> Self {
        let table = INTERNAL_OPERATIONS
            .iter()
            .map(|op| ((*op).to_string(), ExecutionTarget::Internal))
            .chain(
                EXTERNAL_OPERATIONS
                    .iter()
                    .map(|op| ((*op).to_string(), ExecutionTarget::External)),
            )
            .collect();
        Self { table }
    }
}

impl ExecutionRouter {
    /// Creates a router with the default operation table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router with no entries; everything routes internal.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Adds or replaces an entry.
    #[must_use]
    pub fn with_route(mut self, operation: impl Into<String>, target: ExecutionTarget) -> Self {
        self.table.insert(operation.into(), target);
        self
    }

    /// Looks up an operation without logging.
    #[must_use]
    pub fn target_of(&self, operation: &str) -> ExecutionTarget {
        self.table
            .get(operation)
            .copied()
            .unwrap_or(ExecutionTarget::Internal)
    }

    /// Classifies an operation and logs the decision.
    #[must_use]
    pub fn route(&self, operation: &str) -> ExecutionTarget {
        let known = self.table.contains_key(operation);
        let target = self.target_of(operation);
        tracing::info!(operation, %target, known, "Routed operation");
        target
    }
}
