//! Event sinks and the consumer task that feeds them.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::bus::EventReceiver;
use super::event::CognitiveEvent;

/// Destination for cognitive events.
#[async_trait]
pub trait TelemetrySink: Send + Sync + Debug {
    /// Handle one event. Sinks must not fail the stream.
    async fn emit(&self, event: CognitiveEvent);
}

/// Mirrors every event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn emit(&self, event: CognitiveEvent) {
        tracing::info!(
            target: "strata_memory::events",
            event_id = %event.id,
            component = event.component.as_str(),
            event_type = event.event_type().as_str(),
            subject_id = %event.subject_id,
            justification = %event.justification,
            timestamp = %event.timestamp,
            "cognitive event"
        );
    }
}

/// Keeps every event in memory (for tests and inspection).
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<CognitiveEvent>>>,
}

impl CollectingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<CognitiveEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetrySink for CollectingSink {
    async fn emit(&self, event: CognitiveEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Forward every event from `receiver` to `sink` until the bus closes.
pub fn spawn_consumer(mut receiver: EventReceiver, sink: Arc<dyn TelemetrySink>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut forwarded = 0u64;
        while let Some(event) = receiver.recv().await {
            sink.emit(event).await;
            forwarded += 1;
        }
        tracing::debug!(forwarded, "event consumer stopped");
        forwarded
    })
}
