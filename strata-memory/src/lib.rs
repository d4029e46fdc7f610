//! # Strata Memory
//!
//! The lifecycle engine of a four-tier long-term memory for conversational
//! agents, with deterministic simulation testing.
//!
//! ## Tiers
//!
//! - **Tier 1 - turns**: raw conversation, append-only, TTL-bounded
//! - **Tier 2 - facts**: significant statements extracted from turns
//! - **Tier 3 - episodes**: clustered facts, dual-written to a vector index
//!   and a graph index
//! - **Tier 4 - knowledge**: durable units distilled across sessions
//!
//! ## Quick Start
//!
//! ```rust
//! use strata_memory::dst::{SimConfig, Simulation};
//! use strata_memory::lifecycle::LifecycleConfig;
//! use strata_memory::storage::{FactStore, TurnRole};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let env = Simulation::new(SimConfig::with_seed(42)).build();
//! let memory = env.create_lifecycle(LifecycleConfig::default().with_min_score(0.0))?;
//!
//! // Triggers wait for the first recovery sweep.
//! memory.coordinator.run_recovery_sweep().await;
//!
//! memory.say("s1", TurnRole::User, "Alice joined Acme as a staff engineer.").await?;
//! let report = memory.coordinator.on_session_concluded("s1").await;
//!
//! assert!(report.promotion.is_some());
//! assert!(!memory.facts.list_by_session("s1").await?.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      TriggerCoordinator                      │
//! │    recovery sweep │ backlog thresholds │ session concluded   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ PromotionEngine │ ConsolidationEngine │ DistillationEngine   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ SignificanceScorer │ FactExtractor │ EpisodeClusterer │      │
//! │ KnowledgeSynthesizer                                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Tier stores (traits + Sim backends) │ CognitiveEventBus      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DST Framework           │ Fault injection + simulation       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Simulation-First Philosophy
//!
//! > "If you're not testing with fault injection, you're not testing."
//!
//! Every store and provider has a deterministic simulation implementation
//! wired to one fault injector; see [`dst`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod constants;
pub mod dst;
pub mod embedding;
pub mod events;
pub mod lifecycle;
pub mod llm;
pub mod storage;
pub mod telemetry;

// Re-export common types
pub use clock::{Clock, SystemClock};
pub use dst::{
    create_simulation, DeterministicRng, FaultConfig, FaultInjector, FaultType, SimClock,
    SimConfig, SimEnvironment, SimLifecycle, Simulation,
};

// Lifecycle exports (main API)
pub use lifecycle::{
    ConsolidationEngine, DistillationEngine, EpisodeClusterer, FactExtractor,
    KnowledgeSynthesizer, LifecycleConfig, LifecycleError, LifecycleHealth, LifecycleStores,
    PromotionEngine, RunReport, SignificanceScorer, Tier, TriggerCoordinator, TriggerHandle,
};

// Event exports
pub use events::{CognitiveEvent, CognitiveEventBus, Decision, EventType, TelemetrySink};

// Storage exports
pub use storage::{
    Episode, EpisodeFilter, EpisodeGraphIndex, EpisodeVectorIndex, Fact, FactStore,
    KnowledgeStore, KnowledgeUnit, StorageError, Turn, TurnStore,
};

// Provider exports
pub use embedding::{EmbeddingError, EmbeddingProvider, SimEmbeddingProvider};
pub use llm::{CompletionRequest, LLMProvider, ProviderError, SimLLMProvider};
