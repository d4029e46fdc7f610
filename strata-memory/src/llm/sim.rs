//! `SimLLMProvider` - Simulation-First LLM Provider
//!
//! `TigerStyle`: Default provider for tests and development, wraps DST `SimLLM`.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CompletionRequest, LLMProvider, ProviderError};
use crate::dst::{DeterministicRng, FaultInjector, LLMError, SimClock, SimLLM};

/// Simulation provider wrapping the deterministic `SimLLM`.
///
/// # Example
///
/// ```rust
/// use strata_memory::llm::{CompletionRequest, LLMProvider, SimLLMProvider};
///
/// # #[tokio::main]
/// # async fn main() {
/// let provider = SimLLMProvider::with_seed(42);
/// let request = CompletionRequest::new("Extract durable facts.\n[turn t1] user: I live in Oslo now.");
///
/// let first = provider.complete(&request).await.unwrap();
/// let second = SimLLMProvider::with_seed(42).complete(&request).await.unwrap();
/// assert_eq!(first, second);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SimLLMProvider {
    inner: SimLLM,
}

impl SimLLMProvider {
    /// Wrap an existing `SimLLM`, e.g. the one from a `SimEnvironment`.
    #[must_use]
    pub fn from_sim_llm(sim_llm: SimLLM) -> Self {
        Self { inner: sim_llm }
    }

    /// Standalone provider with the given seed and no faults.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let faults = Arc::new(FaultInjector::new(DeterministicRng::new(seed)));
        Self::with_faults(seed, faults)
    }

    /// Standalone provider sharing a fault injector.
    #[must_use]
    pub fn with_faults(seed: u64, faults: Arc<FaultInjector>) -> Self {
        let sim_llm =
            SimLLM::new(SimClock::new(), DeterministicRng::new(seed), faults).without_latency();
        Self { inner: sim_llm }
    }

    /// Seed used by this provider.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.inner.seed()
    }
}

#[async_trait]
impl LLMProvider for SimLLMProvider {
    #[tracing::instrument(skip(self, request), fields(prompt_len = request.prompt.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let full_prompt = match &request.system {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        };

        self.inner
            .complete(&full_prompt)
            .await
            .map_err(llm_error_to_provider_error)
    }

    fn name(&self) -> &'static str {
        "sim"
    }

    fn is_simulation(&self) -> bool {
        true
    }
}

fn llm_error_to_provider_error(err: LLMError) -> ProviderError {
    match err {
        LLMError::Timeout => ProviderError::Timeout,
        LLMError::RateLimit => ProviderError::rate_limit(None),
        LLMError::ContextOverflow(bytes) => ProviderError::ContextOverflow { bytes },
        LLMError::InvalidResponse(msg) => ProviderError::invalid_response(msg),
        LLMError::ServiceUnavailable => ProviderError::service_unavailable("service unavailable"),
        LLMError::InvalidPrompt(msg) => ProviderError::invalid_request(msg),
    }
}
