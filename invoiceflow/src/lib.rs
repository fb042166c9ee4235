//! # Invoiceflow
//!
//! A durable, resumable stage-graph executor for invoice processing.
//!
//! Invoiceflow drives each submitted invoice through a fixed graph of
//! stages with support for:
//!
//! - **Durable runs**: every stage transition is committed with a revision
//!   compare-and-swap, so a run resumes from its last committed stage
//! - **Human review**: runs whose purchase-order match falls below the
//!   threshold suspend at a checkpoint until a reviewer decides
//! - **Routing and selection**: operations are routed to an internal or
//!   external surface, and capability backends are picked with a
//!   placeholder fallback
//! - **Deterministic matching**: two-way invoice/PO scoring
//! - **Observability**: `tracing` spans per stage and a transition event bus
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use invoiceflow::prelude::*;
//!
//! let engine = InvoiceEngine::builder()
//!     .with_config(EngineConfig::from_env()?)
//!     .build()?;
//!
//! let run = engine.process(&invoice).await?;
//! for review in engine.list_pending_reviews()? {
//!     engine
//!         .resolve_decision(ResolveRequest::new(
//!             review.checkpoint_id,
//!             Decision::Accept,
//!             "ok",
//!             "alice",
//!         ))
//!         .await?;
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod document;
pub mod engine;
pub mod errors;
pub mod events;
pub mod matching;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod stages;
pub mod store;
pub mod surfaces;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::context::{StageContext, StateBag};
    pub use crate::core::{Decision, RunStatus, StageId, StageResult, TransitionEvent};
    pub use crate::document::{InvoicePayload, LineItem, PurchaseOrder};
    pub use crate::engine::{
        EngineBuilder, InvoiceEngine, PendingReview, ResolveRequest, ResolveResponse, RunProgress,
    };
    pub use crate::errors::{InvoiceflowError, Result};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::matching::{evaluate, MatchConfig, MatchOutcome, Verdict};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::stages::Stage;
    pub use crate::store::{InMemoryStore, RunRecord, RunStore};
    pub use crate::surfaces::SimulatedExternalSurface;

    #[cfg(feature = "sqlite")]
    pub use crate::store::SqliteStore;
}
