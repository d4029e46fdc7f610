//! Embedding Provider Trait
//!
//! `TigerStyle`: Simulation-first embedding generation. The consolidation
//! engine embeds every episode summary before writing it to the similarity
//! index.
//!
//! ```text
//! EmbeddingProvider (trait)
//! └── SimEmbeddingProvider    (always available, deterministic)
//! ```

mod sim;

pub use sim::SimEmbeddingProvider;

use async_trait::async_trait;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from embedding operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?}s")]
    RateLimit {
        /// Seconds to wait before retrying
        retry_after_secs: Option<u64>,
    },

    /// Service unavailable
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// Error detail
        message: String,
    },

    /// Empty text
    #[error("Empty input provided")]
    EmptyInput,

    /// Vector has the wrong length
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions
        expected: usize,
        /// Actual dimensions
        actual: usize,
    },
}

impl EmbeddingError {
    /// Create a service unavailable error.
    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Whether a retry might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimit { .. } | Self::ServiceUnavailable { .. }
        )
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Text embedding service.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Vector dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// Check an embedding has the expected length.
///
/// # Errors
/// Returns `DimensionMismatch` if the lengths differ.
pub fn validate_dimensions(embedding: &[f32], expected: usize) -> Result<(), EmbeddingError> {
    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(EmbeddingError::Timeout.is_retryable());
        assert!(EmbeddingError::service_unavailable("x").is_retryable());
        assert!(!EmbeddingError::EmptyInput.is_retryable());
    }

    #[test]
    fn test_validate_dimensions() {
        assert!(validate_dimensions(&[0.0; 3], 3).is_ok());
        assert!(matches!(
            validate_dimensions(&[0.0; 2], 3),
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }
}
