//! Lifecycle - migration of memory between tiers
//!
//! `TigerStyle`: Every migration is idempotent and all-or-nothing.
//!
//! ```text
//! Tier 1 turns ──PromotionEngine──► Tier 2 facts
//!     (FactExtractor + SignificanceScorer)
//! Tier 2 facts ──ConsolidationEngine──► Tier 3 episodes (vector + graph)
//!     (EpisodeClusterer + KnowledgeSynthesizer + EmbeddingProvider)
//! Tier 3 episodes ──DistillationEngine──► Tier 4 knowledge
//!     (EpisodeClusterer + KnowledgeSynthesizer)
//!
//! TriggerCoordinator: recovery sweep, backlog thresholds, session end
//! ```
//!
//! Every decision is published as a `CognitiveEvent` on the bus.

pub mod clusterer;
mod config;
mod consolidation;
mod coordinator;
mod distillation;
mod error;
mod extractor;
mod locks;
mod promotion;
pub mod prompts;
mod retry;
mod scorer;
mod synthesizer;

pub use clusterer::{ClusterError, EpisodeClusterer};
pub use config::{
    BacklogWatermarks, ClusterConfig, ConfigError, DecayConfig, LifecycleConfig, RetryPolicy,
};
pub use consolidation::{ConsolidationEngine, ConsolidationOutcome};
pub use coordinator::{
    LifecycleHealth, LifecycleStores, RunReport, RunStatus, ThresholdOutcome, Tier, TierHealth,
    TriggerCoordinator, TriggerError, TriggerHandle, TriggerRequest,
};
pub use distillation::{DistillationEngine, DistillationOutcome};
pub use error::LifecycleError;
pub use extractor::{CandidateFact, ExtractionError, ExtractionOutput, FactExtractor};
pub use locks::{SessionGuard, SessionLocks};
pub use promotion::{PromotionEngine, PromotionOutcome, PromotionPhase};
pub use retry::{retry_with_backoff, RetryFailure};
pub use scorer::{ScoreError, SignificanceScorer};
pub use synthesizer::{EpisodeDraft, KnowledgeDraft, KnowledgeSynthesizer, SynthesisError};

/// Which sessions an engine run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunScope {
    /// Every session with a backlog
    All,
    /// One session
    Session(String),
}
