//! Engine assembly.

use std::sync::Arc;

use super::InvoiceEngine;
use crate::config::EngineConfig;
use crate::context::StageServices;
use crate::errors::Result;
use crate::events::{EventBus, EventSink, LoggingEventSink, DEFAULT_EVENT_CAPACITY};
use crate::pipeline::Executor;
use crate::routing::{
    AlwaysAvailable, Availability, CapabilityRegistry, ExecutionRouter, ToolSelector,
};
use crate::stages::{Stage, StageRegistry};
use crate::store::{InMemoryStore, ReviewQueue, RunStore};
use crate::surfaces::{Dispatcher, ExecutionSurface, InternalSurface, SimulatedExternalSurface};

/// Builder for [`InvoiceEngine`].
///
/// Everything not set explicitly falls back to a working default: the
/// in-memory store (or SQLite when `database_url` is configured), the
/// simulated external systems, the standard stage set and the built-in
/// capability pools with every backend available.
#[derive(Debug)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn RunStore>>,
    external: Option<Arc<dyn ExecutionSurface>>,
    router: ExecutionRouter,
    capabilities: CapabilityRegistry,
    availability: Arc<dyn Availability>,
    stages: StageRegistry,
    sink: Arc<dyn EventSink>,
    event_capacity: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            external: None,
            router: ExecutionRouter::default(),
            capabilities: CapabilityRegistry::default(),
            availability: Arc::new(AlwaysAvailable),
            stages: StageRegistry::standard(),
            sink: Arc::new(LoggingEventSink::debug()),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `store` instead of the one derived from the configuration.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the surface that runs external operations.
    #[must_use]
    pub fn with_external_surface(mut self, surface: Arc<dyn ExecutionSurface>) -> Self {
        self.external = Some(surface);
        self
    }

    /// Sets the operation routing table.
    #[must_use]
    pub fn with_router(mut self, router: ExecutionRouter) -> Self {
        self.router = router;
        self
    }

    /// Sets the capability pools.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the backend availability predicate.
    #[must_use]
    pub fn with_availability(mut self, availability: Arc<dyn Availability>) -> Self {
        self.availability = availability;
        self
    }

    /// Replaces one stage implementation.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages = self.stages.with_stage(stage);
        self
    }

    /// Sets the sink transition events are handed to.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets how many events a subscriber may fall behind.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validates the configuration and assembles the engine.
    ///
    /// # Errors
    ///
    /// Returns a config error for invalid settings and a store error if the
    /// configured database cannot be opened.
    pub fn build(self) -> Result<InvoiceEngine> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let store = match self.store {
            Some(store) => store,
            None => open_store(&config)?,
        };
        let external = self
            .external
            .unwrap_or_else(|| Arc::new(SimulatedExternalSurface::new()));
        let internal = Arc::new(InternalSurface::new(
            config.match_config(),
            config.approval_policy(),
        ));

        let dispatcher = Dispatcher::new(self.router, internal, external, config.retry.clone());
        let selector = ToolSelector::new(self.capabilities, self.availability);
        let services = StageServices::new(
            Arc::new(dispatcher),
            Arc::new(selector),
            Arc::clone(&config),
        );
        let events = EventBus::new(self.event_capacity).with_sink(self.sink);

        tracing::info!(
            match_threshold = config.match_threshold,
            tolerance_pct = config.tolerance_pct,
            stages = self.stages.len(),
            "Invoice engine ready"
        );

        let executor = Executor::new(Arc::clone(&store), self.stages, services, events);
        Ok(InvoiceEngine {
            executor: Arc::new(executor),
            queue: ReviewQueue::new(store),
            config,
        })
    }
}

#[cfg(feature = "sqlite")]
fn open_store(config: &EngineConfig) -> Result<Arc<dyn RunStore>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(crate::store::SqliteStore::open(url)?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "sqlite"))]
fn open_store(config: &EngineConfig) -> Result<Arc<dyn RunStore>> {
    match &config.database_url {
        Some(_) => Err(crate::errors::InvoiceflowError::Config(
            "database_url needs the `sqlite` feature".to_string(),
        )),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}
