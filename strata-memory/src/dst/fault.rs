//! `FaultInjector` - Probabilistic Fault Injection
//!
//! `TigerStyle`: Explicit fault injection for chaos testing.
//!
//! Every simulated backend names its operations (`episode_graph_upsert`,
//! `llm_complete`, `embedding_embed`, ...) and asks the shared injector
//! whether that call should fail. A fault only fires on operations of its
//! own domain, so an LLM timeout never surfaces as a storage error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::rng::DeterministicRng;
use crate::constants::DST_FAULT_PROBABILITY_MAX;

/// Operation-name prefix of reasoning-service calls.
pub const OPERATION_PREFIX_LLM: &str = "llm_";

/// Operation-name prefix of embedding calls.
pub const OPERATION_PREFIX_EMBEDDING: &str = "embedding_";

/// Types of faults that can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    // =========================================================================
    // Storage Faults
    // =========================================================================
    /// Write operation fails
    StorageWriteFail,
    /// Read operation fails
    StorageReadFail,
    /// Delete operation fails
    StorageDeleteFail,
    /// Storage call times out
    StorageTimeout,

    // =========================================================================
    // LLM Faults
    // =========================================================================
    /// LLM request timeout
    LlmTimeout,
    /// Rate limit exceeded
    LlmRateLimit,
    /// Response is not the requested shape
    LlmInvalidResponse,
    /// Service unavailable
    LlmServiceUnavailable,

    // =========================================================================
    // Embedding Faults
    // =========================================================================
    /// Embedding request timeout
    EmbeddingTimeout,
    /// Embedding service unavailable
    EmbeddingServiceUnavailable,
}

impl FaultType {
    /// Fault type name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorageWriteFail => "storage_write_fail",
            Self::StorageReadFail => "storage_read_fail",
            Self::StorageDeleteFail => "storage_delete_fail",
            Self::StorageTimeout => "storage_timeout",
            Self::LlmTimeout => "llm_timeout",
            Self::LlmRateLimit => "llm_rate_limit",
            Self::LlmInvalidResponse => "llm_invalid_response",
            Self::LlmServiceUnavailable => "llm_service_unavailable",
            Self::EmbeddingTimeout => "embedding_timeout",
            Self::EmbeddingServiceUnavailable => "embedding_service_unavailable",
        }
    }

    /// Whether this fault can fire on the named operation.
    #[must_use]
    pub fn applies_to(&self, operation: &str) -> bool {
        match self {
            Self::LlmTimeout
            | Self::LlmRateLimit
            | Self::LlmInvalidResponse
            | Self::LlmServiceUnavailable => operation.starts_with(OPERATION_PREFIX_LLM),
            Self::EmbeddingTimeout | Self::EmbeddingServiceUnavailable => {
                operation.starts_with(OPERATION_PREFIX_EMBEDDING)
            }
            Self::StorageWriteFail
            | Self::StorageReadFail
            | Self::StorageDeleteFail
            | Self::StorageTimeout => {
                !operation.starts_with(OPERATION_PREFIX_LLM)
                    && !operation.starts_with(OPERATION_PREFIX_EMBEDDING)
            }
        }
    }
}

/// Configuration for a specific fault.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// The type of fault
    pub fault_type: FaultType,
    /// Probability of injection (0.0 to 1.0)
    pub probability: f64,
    /// Optional operation filter (substring match)
    pub operation_filter: Option<String>,
    /// Maximum number of injections (None = unlimited)
    pub max_injections: Option<u64>,
}

impl FaultConfig {
    /// Create a new fault configuration.
    ///
    /// # Panics
    /// Panics if probability is not in [0, 1].
    #[must_use]
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        assert!(
            (0.0..=DST_FAULT_PROBABILITY_MAX).contains(&probability),
            "probability must be in [0, {DST_FAULT_PROBABILITY_MAX}], got {probability}"
        );

        Self {
            fault_type,
            probability,
            operation_filter: None,
            max_injections: None,
        }
    }

    /// Only inject on operations whose name contains `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.operation_filter = Some(filter.into());
        self
    }

    /// Stop injecting after `max` hits.
    ///
    /// # Panics
    /// Panics if `max` is zero.
    #[must_use]
    pub fn with_max_injections(mut self, max: u64) -> Self {
        assert!(max > 0, "max_injections must be positive");
        self.max_injections = Some(max);
        self
    }

    fn matches(&self, operation: &str) -> bool {
        if !self.fault_type.applies_to(operation) {
            return false;
        }
        match &self.operation_filter {
            Some(filter) => operation.contains(filter.as_str()),
            None => true,
        }
    }
}

/// A registered fault and how often it has fired.
#[derive(Debug)]
struct RegisteredFault {
    config: FaultConfig,
    injections: AtomicU64,
}

/// Fault injector for simulation testing.
///
/// `TigerStyle`:
/// - Explicit fault registration before sharing via `Arc`
/// - Deterministic through the seeded RNG
/// - Per-fault injection counts
#[derive(Debug)]
pub struct FaultInjector {
    rng: Mutex<DeterministicRng>,
    faults: Vec<RegisteredFault>,
}

impl FaultInjector {
    /// Create an injector with no faults registered.
    #[must_use]
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            faults: Vec::new(),
        }
    }

    /// Register a fault configuration.
    pub fn register(&mut self, config: FaultConfig) {
        self.faults.push(RegisteredFault {
            config,
            injections: AtomicU64::new(0),
        });
    }

    /// Decide whether `operation` should fail, returning the fault to raise.
    ///
    /// # Panics
    /// Panics if the RNG mutex is poisoned.
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        for fault in &self.faults {
            if !fault.config.matches(operation) {
                continue;
            }

            if let Some(max) = fault.config.max_injections {
                if fault.injections.load(Ordering::SeqCst) >= max {
                    continue;
                }
            }

            let roll = self.rng.lock().unwrap().next_bool(fault.config.probability);
            if roll {
                fault.injections.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(
                    operation,
                    fault = fault.config.fault_type.as_str(),
                    "injecting fault"
                );
                return Some(fault.config.fault_type);
            }
        }

        None
    }

    /// Injection counts by fault name.
    #[must_use]
    pub fn injection_stats(&self) -> Vec<(&'static str, u64)> {
        self.faults
            .iter()
            .map(|f| {
                (
                    f.config.fault_type.as_str(),
                    f.injections.load(Ordering::SeqCst),
                )
            })
            .collect()
    }

    /// Total number of injections across all faults.
    #[must_use]
    pub fn total_injections(&self) -> u64 {
        self.faults
            .iter()
            .map(|f| f.injections.load(Ordering::SeqCst))
            .sum()
    }
}

/// Builder for `FaultInjector`.
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    configs: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    /// Create a new builder with the given RNG.
    #[must_use]
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            configs: Vec::new(),
        }
    }

    /// Add a fault configuration.
    #[must_use]
    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Add read and write storage faults.
    #[must_use]
    pub fn with_storage_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::StorageWriteFail, probability))
            .with_fault(FaultConfig::new(FaultType::StorageReadFail, probability))
    }

    /// Add timeout and rate-limit LLM faults.
    #[must_use]
    pub fn with_llm_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::LlmTimeout, probability))
            .with_fault(FaultConfig::new(FaultType::LlmRateLimit, probability))
    }

    /// Build the `FaultInjector`.
    #[must_use]
    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for config in self.configs {
            injector.register(config);
        }
        injector
    }
}
