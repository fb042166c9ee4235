//! Two-layer capability routing.
//!
//! The [`ExecutionRouter`] decides whether an operation runs on the
//! internal or external surface. The [`ToolSelector`] then picks a backend
//! from the capability's pool, falling back to a placeholder when none is
//! available.

mod registry;
mod router;
mod selector;

pub use registry::{AlwaysAvailable, Availability, AvailabilityTable, CapabilityRegistry};
pub use router::{ExecutionRouter, ExecutionTarget, EXTERNAL_OPERATIONS, INTERNAL_OPERATIONS};
pub use selector::{RejectedBackend, SelectionContext, SelectionRecord, ToolSelector};
