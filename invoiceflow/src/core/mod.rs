//! Core domain model types for invoiceflow.
//!
//! This module contains the fundamental types used throughout the executor:
//! - Stage identifiers and run status enums
//! - Stage results with their audit entries
//! - Transition events

mod event;
mod result;
mod stage_id;
mod status;

pub use event::TransitionEvent;
pub use result::{AuditEntry, StageOutcome, StageResult};
pub use stage_id::StageId;
pub use status::{Branch, Decision, RunStatus, StageMode};
