//! Backend selection within a capability pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::registry::{AlwaysAvailable, Availability, CapabilityRegistry};
use crate::core::StageId;

/// A backend skipped during selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedBackend {
    /// Backend name.
    pub backend: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Immutable record of one selection, appended to the run's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    /// Capability that was requested.
    pub capability: String,
    /// Backend that will serve the request.
    pub selected: String,
    /// True when the pool was exhausted and the placeholder was used.
    pub placeholder: bool,
    /// Higher-priority backends that were skipped, in pool order.
    #[serde(default)]
    pub rejected: Vec<RejectedBackend>,
    /// Stage that asked for the selection.
    pub stage: StageId,
    /// When the selection was made.
    pub timestamp: DateTime<Utc>,
}

/// Who is asking for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionContext {
    /// The run being processed.
    pub run_id: Uuid,
    /// The stage being executed.
    pub stage: StageId,
}

impl SelectionContext {
    /// Creates a context.
    #[must_use]
    pub fn new(run_id: Uuid, stage: StageId) -> Self {
        Self { run_id, stage }
    }
}

/// Picks the first available backend of a pool.
///
/// Selection never fails: an exhausted or unknown pool yields the
/// capability's placeholder backend.
#[derive(Debug, Clone)]
pub struct ToolSelector {
    registry: Arc<CapabilityRegistry>,
    availability: Arc<dyn Availability>,
}

impl Default for ToolSelector {
    fn default() -> Self {
        Self::new(CapabilityRegistry::default(), Arc::new(AlwaysAvailable))
    }
}

impl ToolSelector {
    /// Creates a selector over a registry and availability predicate.
    #[must_use]
    pub fn new(registry: CapabilityRegistry, availability: Arc<dyn Availability>) -> Self {
        Self {
            registry: Arc::new(registry),
            availability,
        }
    }

    /// The registry this selector reads.
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Selects a backend for `capability`.
    #[must_use]
    pub fn select(&self, capability: &str, context: SelectionContext) -> SelectionRecord {
        let mut rejected = Vec::new();

        for backend in self.registry.pool(capability) {
            match self.availability.check(capability, backend) {
                Ok(()) => {
                    tracing::info!(
                        run_id = %context.run_id,
                        stage = %context.stage,
                        capability,
                        selected = %backend,
                        fallbacks = rejected.len(),
                        "Selected backend"
                    );
                    return SelectionRecord {
                        capability: capability.to_string(),
                        selected: backend.clone(),
                        placeholder: false,
                        rejected,
                        stage: context.stage,
                        timestamp: Utc::now(),
                    };
                }
                Err(reason) => rejected.push(RejectedBackend {
                    backend: backend.clone(),
                    reason,
                }),
            }
        }

        let selected = CapabilityRegistry::placeholder(capability);
        tracing::warn!(
            run_id = %context.run_id,
            stage = %context.stage,
            capability,
            selected = %selected,
            fallbacks = rejected.len(),
            "No backend available, using placeholder"
        );
        SelectionRecord {
            capability: capability.to_string(),
            selected,
            placeholder: true,
            rejected,
            stage: context.stage,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::AvailabilityTable;
    use pretty_assertions::assert_eq;

    fn ctx() -> SelectionContext {
        SelectionContext::new(Uuid::new_v4(), StageId::Understand)
    }

    #[test]
    fn test_first_available_wins() {
        let selector = ToolSelector::default();
        let record = selector.select("ocr", ctx());
        assert_eq!(record.selected, "google_vision");
        assert!(record.rejected.is_empty());
        assert!(!record.placeholder);
    }

    #[test]
    fn test_skips_unavailable_and_records_each() {
        let table = AvailabilityTable::new()
            .with_unavailable("google_vision", "quota exceeded")
            .with_unavailable("tesseract", "not installed");
        let selector = ToolSelector::new(CapabilityRegistry::default(), Arc::new(table));

        let record = selector.select("ocr", ctx());
        assert_eq!(record.selected, "aws_textract");
        assert_eq!(
            record.rejected,
            vec![
                RejectedBackend {
                    backend: "google_vision".into(),
                    reason: "quota exceeded".into()
                },
                RejectedBackend {
                    backend: "tesseract".into(),
                    reason: "not installed".into()
                },
            ]
        );
    }

    #[test]
    fn test_first_n_unavailable_records_exactly_n() {
        let registry = CapabilityRegistry::empty()
            .with_pool("probe", (0..6).map(|i| format!("backend-{i}")));
        for n in 0..6 {
            let table = AvailabilityTable::new();
            for i in 0..n {
                table.set_unavailable(&format!("backend-{i}"), "down");
            }
            let selector = ToolSelector::new(registry.clone(), Arc::new(table));
            let record = selector.select("probe", ctx());
            assert_eq!(record.selected, format!("backend-{n}"));
            assert_eq!(record.rejected.len(), n);
        }
    }

    #[test]
    fn test_exhausted_pool_degrades_to_placeholder() {
        let table = AvailabilityTable::new()
            .with_unavailable("sendgrid", "down")
            .with_unavailable("ses", "down")
            .with_unavailable("smartlead", "down");
        let selector = ToolSelector::new(CapabilityRegistry::default(), Arc::new(table));

        let record = selector.select("email", ctx());
        assert_eq!(record.selected, "email:placeholder");
        assert!(record.placeholder);
        assert_eq!(record.rejected.len(), 3);
    }

    #[test]
    fn test_unknown_capability_degrades_to_placeholder() {
        let record = ToolSelector::default().select("telepathy", ctx());
        assert_eq!(record.selected, "telepathy:placeholder");
        assert!(record.rejected.is_empty());
    }
}
