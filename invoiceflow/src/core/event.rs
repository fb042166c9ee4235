//! Stage-transition events published to progress subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::{RunStatus, StageId};

/// Emitted whenever a run's stage pointer or status changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// The event type (e.g. "stage.completed", "run.suspended").
    #[serde(rename = "type")]
    pub event_type: String,
    /// The run this event belongs to.
    pub run_id: Uuid,
    /// The stage the run is now at.
    pub stage: StageId,
    /// The run status after the transition.
    pub status: RunStatus,
    /// The run revision after the transition.
    pub revision: u64,
    /// When the transition was committed.
    pub timestamp: DateTime<Utc>,
    /// Summary of the stage output that caused the transition.
    #[serde(default)]
    pub summary: serde_json::Value,
}

impl TransitionEvent {
    /// Creates a new transition event.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        run_id: Uuid,
        stage: StageId,
        status: RunStatus,
        revision: u64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            run_id,
            stage,
            status,
            revision,
            timestamp: Utc::now(),
            summary: serde_json::Value::Null,
        }
    }

    /// Attaches an output summary.
    #[must_use]
    pub fn with_summary(mut self, summary: serde_json::Value) -> Self {
        self.summary = summary;
        self
    }

    /// Converts the event to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.event_type));
        map.insert("run_id".to_string(), serde_json::json!(self.run_id.to_string()));
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("status".to_string(), serde_json::json!(self.status));
        map.insert("revision".to_string(), serde_json::json!(self.revision));
        map.insert(
            "timestamp".to_string(),
            serde_json::json!(self.timestamp.to_rfc3339()),
        );
        if !self.summary.is_null() {
            map.insert("summary".to_string(), self.summary.clone());
        }
        map
    }
}
