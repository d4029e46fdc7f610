//! Cognitive Events - Decision telemetry
//!
//! Every promote, reject, consolidate and distill decision is published as
//! a [`CognitiveEvent`] on a bounded [`CognitiveEventBus`]. A consumer task
//! drains the bus into a [`TelemetrySink`].
//!
//! ```text
//! engines ──publish()──► [bounded buffer] ──recv()──► spawn_consumer ──► sink
//!             │
//!             └── full? drop + dropped_count += 1
//! ```

mod bus;
mod event;
mod sink;

pub use bus::{CognitiveEventBus, EventReceiver};
pub use event::{truncate_justification, CognitiveEvent, Component, Decision, EventType};
pub use sink::{spawn_consumer, CollectingSink, TelemetrySink, TracingSink};
