//! Run-level lifecycle errors.
//!
//! Classification:
//! - transient service failure, deferred window, transient storage fault:
//!   retryable, surfaced in health and picked up by the next trigger
//! - contract violation (empty cluster, bad score input, bad config):
//!   not retryable, halts only the engine run that hit it

use super::clusterer::ClusterError;
use super::config::ConfigError;
use super::extractor::ExtractionError;
use super::scorer::ScoreError;
use super::synthesizer::SynthesisError;
use crate::embedding::EmbeddingError;
use crate::storage::StorageError;

/// Why an engine run failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    /// Tier store failure
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Fact extraction failure
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),

    /// Summary or knowledge synthesis failure
    #[error("synthesis: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Embedding failure
    #[error("embedding: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Clustering contract violation
    #[error("clustering: {0}")]
    Cluster(#[from] ClusterError),

    /// Scoring input out of range
    #[error("scoring: {0}")]
    Score(#[from] ScoreError),

    /// Invalid configuration
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// A session window was set aside for the next recovery sweep
    #[error("session {session_id} deferred: {reason}")]
    Deferred {
        /// Deferred session
        session_id: String,
        /// Underlying failure
        reason: String,
    },

    /// One or more units of a multi-unit run failed
    #[error("{failures} of {attempted} units failed, last: {last}")]
    Partial {
        /// Units attempted
        attempted: usize,
        /// Units that failed
        failures: usize,
        /// Last failure message
        last: String,
        /// Whether every failure was retryable
        retryable: bool,
    },
}

impl LifecycleError {
    /// Create a deferred error.
    #[must_use]
    pub fn deferred(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Deferred {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the next trigger may succeed where this run failed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Extraction(e) => e.is_retryable(),
            Self::Synthesis(e) => e.is_retryable(),
            Self::Embedding(e) => e.is_retryable(),
            Self::Deferred { .. } => true,
            Self::Partial { retryable, .. } => *retryable,
            Self::Cluster(_) | Self::Score(_) | Self::Config(_) => false,
        }
    }
}
