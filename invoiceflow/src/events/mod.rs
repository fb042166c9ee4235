//! Transition event distribution.
//!
//! Every committed transition is handed to the configured [`EventSink`]
//! and broadcast to subscribers. Subscribers that fall behind lose the
//! oldest events; the run record stays the source of truth.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use uuid::Uuid;

use crate::core::TransitionEvent;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fan-out of transition events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TransitionEvent>,
    sink: Arc<dyn EventSink>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the sink every event is also handed to.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Publishes an event. Never blocks and never fails.
    pub fn publish(&self, event: TransitionEvent) {
        self.sink.try_emit(&event);
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribes to one run's events.
    #[must_use]
    pub fn subscribe(&self, run_id: Uuid) -> RunSubscription {
        RunSubscription {
            run_id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribes to every run's events.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<TransitionEvent> {
        self.sender.subscribe()
    }
}

/// Stream of one run's transition events.
#[derive(Debug)]
pub struct RunSubscription {
    run_id: Uuid,
    receiver: broadcast::Receiver<TransitionEvent>,
}

impl RunSubscription {
    /// The run being followed.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Waits for the next event of the run. Returns `None` once the bus is
    /// dropped.
    pub async fn next(&mut self) -> Option<TransitionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.run_id == self.run_id => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(run_id = %self.run_id, skipped, "Subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event of the run without waiting.
    pub fn try_next(&mut self) -> Option<TransitionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.run_id == self.run_id => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(run_id = %self.run_id, skipped, "Subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drains every buffered event of the run.
    pub fn drain(&mut self) -> Vec<TransitionEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
