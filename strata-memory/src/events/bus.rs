//! Bounded, non-blocking event bus.
//!
//! `TigerStyle`: Publishing never waits. A full or closed buffer drops the
//! event and bumps a counter; the lifecycle never stalls on telemetry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use super::event::CognitiveEvent;
use crate::constants::EVENT_BUS_CAPACITY_COUNT_MAX;

#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of the cognitive event stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CognitiveEventBus {
    sender: mpsc::Sender<CognitiveEvent>,
    counters: Arc<BusCounters>,
    capacity: usize,
}

/// Consumer side of the cognitive event stream.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: mpsc::Receiver<CognitiveEvent>,
}

impl CognitiveEventBus {
    /// Create a bus buffering at most `capacity` events.
    ///
    /// # Panics
    /// Panics if `capacity` is 0 or above `EVENT_BUS_CAPACITY_COUNT_MAX`.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, EventReceiver) {
        assert!(capacity > 0, "event bus capacity must be positive");
        assert!(
            capacity <= EVENT_BUS_CAPACITY_COUNT_MAX,
            "event bus capacity {capacity} exceeds {EVENT_BUS_CAPACITY_COUNT_MAX}"
        );

        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                counters: Arc::new(BusCounters::default()),
                capacity,
            },
            EventReceiver { receiver },
        )
    }

    /// Publish without waiting. Returns `false` if the event was dropped.
    pub fn publish(&self, event: CognitiveEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    event_type = event.event_type().as_str(),
                    subject_id = %event.subject_id,
                    dropped,
                    "event bus full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    event_type = event.event_type().as_str(),
                    dropped,
                    "event bus closed, dropping event"
                );
                false
            }
        }
    }

    /// Events accepted into the buffer.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }

    /// Events dropped because the buffer was full or closed.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Configured buffer size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EventReceiver {
    /// Next event, or `None` once every bus handle is gone.
    pub async fn recv(&mut self) -> Option<CognitiveEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is buffered.
    pub fn try_recv(&mut self) -> Option<CognitiveEvent> {
        self.receiver.try_recv().ok()
    }

    /// Take every buffered event.
    pub fn drain(&mut self) -> Vec<CognitiveEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
