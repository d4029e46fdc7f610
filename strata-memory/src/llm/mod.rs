//! LLM Provider Trait - Reasoning Service Interface
//!
//! `TigerStyle`: Simulation-first abstraction over the external reasoning
//! service used for fact extraction and synthesis.
//!
//! # Architecture
//!
//! ```text
//! LLMProvider (trait, object safe)
//! └── SimLLMProvider      (always available, wraps DST SimLLM)
//! ```
//!
//! Production clients live outside this crate and implement the same trait.

mod sim;

pub use sim::SimLLMProvider;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::constants::{LLM_PROMPT_BYTES_MAX, LLM_RESPONSE_BYTES_MAX};

// =============================================================================
// Error Types
// =============================================================================

/// Errors from reasoning-service calls.
///
/// `TigerStyle`: Explicit variants, classified by `is_retryable`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?}s")]
    RateLimit {
        /// Seconds to wait before retrying, if the service said
        retry_after_secs: Option<u64>,
    },

    /// Prompt too large for the model
    #[error("Context length exceeded: {bytes} bytes")]
    ContextOverflow {
        /// Prompt size that was rejected
        bytes: usize,
    },

    /// Response did not have the requested shape
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// What was wrong with it
        message: String,
    },

    /// Service unavailable
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// Error detail
        message: String,
    },

    /// Credentials rejected
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Request rejected as invalid
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error detail
        message: String,
    },
}

impl ProviderError {
    /// Create a rate limit error.
    #[must_use]
    pub fn rate_limit(retry_after_secs: Option<u64>) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    /// Create an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a service unavailable error.
    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether a retry might succeed.
    ///
    /// A malformed whole response is retryable: models rarely repeat the
    /// same formatting mistake.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::RateLimit { .. }
                | Self::ServiceUnavailable { .. }
                | Self::InvalidResponse { .. }
        )
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// A completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The user prompt
    pub prompt: String,
    /// Optional system prompt
    pub system: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Ask the service for JSON output
    pub json_mode: bool,
}

impl CompletionRequest {
    /// Create a new request.
    ///
    /// # Panics
    /// Panics if the prompt is empty or exceeds `LLM_PROMPT_BYTES_MAX`.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();

        assert!(!prompt.is_empty(), "prompt must not be empty");
        assert!(
            prompt.len() <= LLM_PROMPT_BYTES_MAX,
            "prompt exceeds {LLM_PROMPT_BYTES_MAX} bytes"
        );

        Self {
            prompt,
            system: None,
            max_tokens: None,
            temperature: None,
            json_mode: false,
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature.
    ///
    /// # Panics
    /// Panics if temperature is not in [0, 1].
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&temperature),
            "temperature must be in [0.0, 1.0]"
        );
        self.temperature = Some(temperature);
        self
    }

    /// Request JSON output.
    #[must_use]
    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// The reasoning service used by the lifecycle engines.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;

    /// Complete a prompt and parse the response as JSON.
    async fn complete_json<T: DeserializeOwned + Send>(
        &self,
        request: &CompletionRequest,
    ) -> Result<T, ProviderError>
    where
        Self: Sized,
    {
        let response = self.complete(request).await?;
        debug_assert!(
            response.len() <= LLM_RESPONSE_BYTES_MAX,
            "response exceeds limit"
        );
        serde_json::from_str(&response).map_err(|e| ProviderError::invalid_response(e.to_string()))
    }

    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Whether this is a simulation provider.
    fn is_simulation(&self) -> bool;
}

// =============================================================================
// Tests
// =============================================================================
