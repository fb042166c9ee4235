//! Stage span attributes and timing.

use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::core::StageId;

/// Attributes recorded for one stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpanAttributes {
    /// The run.
    pub run_id: Uuid,
    /// The stage.
    pub stage: StageId,
    /// Run revision before the stage ran.
    pub revision: u64,
    /// Outcome label (`proceed`, `await_decision`, `failed`).
    pub outcome: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Error message, if the stage failed.
    pub error: Option<String>,
}

impl StageSpanAttributes {
    /// Creates attributes for a stage about to run.
    #[must_use]
    pub fn new(run_id: Uuid, stage: StageId, revision: u64) -> Self {
        Self {
            run_id,
            stage,
            revision,
            outcome: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Sets the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Flat key/value form for log sinks.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("invoiceflow.run_id".to_string(), self.run_id.to_string());
        attrs.insert("invoiceflow.stage".to_string(), self.stage.to_string());
        attrs.insert("invoiceflow.revision".to_string(), self.revision.to_string());
        if let Some(ref outcome) = self.outcome {
            attrs.insert("invoiceflow.stage.outcome".to_string(), outcome.clone());
        }
        if let Some(duration) = self.duration_ms {
            attrs.insert("invoiceflow.stage.duration_ms".to_string(), format!("{duration:.2}"));
        }
        if let Some(ref error) = self.error {
            attrs.insert("invoiceflow.stage.error".to_string(), error.clone());
        }
        attrs
    }

    /// Emits the finished span as a log event.
    pub fn log(&self) {
        match self.error {
            Some(ref error) => tracing::error!(
                run_id = %self.run_id,
                stage = %self.stage,
                revision = self.revision,
                duration_ms = self.duration_ms.unwrap_or_default(),
                error = %error,
                "Stage failed"
            ),
            None => tracing::info!(
                run_id = %self.run_id,
                stage = %self.stage,
                revision = self.revision,
                duration_ms = self.duration_ms.unwrap_or_default(),
                outcome = self.outcome.as_deref().unwrap_or("unknown"),
                "Stage finished"
            ),
        }
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}
