//! Storage - Tier Store Traits and Simulated Backends
//!
//! `TigerStyle`: Abstract storage with simulation-first testing.
//!
//! # Architecture
//!
//! ```text
//! Tier 1            Tier 2           Tier 3                         Tier 4
//! ┌───────────┐     ┌───────────┐    ┌──────────────┬────────────┐  ┌────────────────┐
//! │ TurnStore │ ──► │ FactStore │ ─► │ VectorIndex  │ GraphIndex │─►│ KnowledgeStore │
//! └───────────┘     └───────────┘    └──────────────┴────────────┘  └────────────────┘
//! ```
//!
//! Every `Sim*` store takes the same `Arc<FaultInjector>` so one seed
//! drives the faults of a whole simulated deployment. Operation names
//! passed to the injector are prefixed by tier (`turn_`, `fact_`,
//! `episode_`, `knowledge_`) so tests can target a single write.

mod episode_store;
mod error;
mod fact_store;
mod knowledge_store;
mod records;
mod turn_store;

pub use episode_store::{
    EpisodeFilter, EpisodeGraphIndex, EpisodeVectorIndex, SimEpisodeGraphIndex,
    SimEpisodeVectorIndex, SimilarityHit,
};
pub use error::{StorageError, StorageResult};
pub use fact_store::{FactStore, SimFactStore};
pub use knowledge_store::{KnowledgeHit, KnowledgeStore, SimKnowledgeStore};
pub use records::{
    episode_id, fact_id, knowledge_unit_id, turn_id, Episode, Fact, KnowledgeUnit, NewTurn,
    Provenance, Relation, Turn, TurnRole,
};
pub use turn_store::{SimTurnStore, TurnStore, WindowClaim};
