//! Simulated Embedding Provider
//!
//! `TigerStyle`: Deterministic embeddings for DST.
//!
//! Each normalized term of the text is hashed to a pseudo-random unit
//! direction; the embedding is the normalized sum. Texts sharing terms
//! therefore land near each other, which keeps similarity search in
//! simulation meaningful.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};
use crate::constants::EMBEDDING_DIMENSIONS_COUNT;
use crate::dst::{DeterministicRng, FaultInjector, FaultType};
use crate::lifecycle::clusterer::normalized_terms;

/// Deterministic embedding provider.
#[derive(Clone, Debug)]
pub struct SimEmbeddingProvider {
    seed: u64,
    dimensions: usize,
    fault_injector: Option<Arc<FaultInjector>>,
}

impl SimEmbeddingProvider {
    /// Provider with the given seed and no faults.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            dimensions: EMBEDDING_DIMENSIONS_COUNT,
            fault_injector: None,
        }
    }

    /// Provider sharing a fault injector.
    #[must_use]
    pub fn with_faults(seed: u64, fault_injector: Arc<FaultInjector>) -> Self {
        Self {
            fault_injector: Some(fault_injector),
            ..Self::with_seed(seed)
        }
    }

    fn term_direction(&self, term: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        term.hash(&mut hasher);
        let mut rng = DeterministicRng::new(hasher.finish());

        #[allow(clippy::cast_possible_truncation)]
        (0..self.dimensions)
            .map(|_| (rng.next_float() * 2.0 - 1.0) as f32)
            .collect()
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut terms: Vec<String> = normalized_terms(text).into_iter().collect();
        if terms.is_empty() {
            terms.push(text.to_lowercase());
        }

        let mut embedding = vec![0.0_f32; self.dimensions];
        for term in &terms {
            for (acc, v) in embedding.iter_mut().zip(self.term_direction(term)) {
                *acc += v;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        debug_assert_eq!(embedding.len(), self.dimensions);
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for SimEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        if let Some(injector) = &self.fault_injector {
            match injector.should_inject("embedding_embed") {
                Some(FaultType::EmbeddingTimeout) => return Err(EmbeddingError::Timeout),
                Some(_) => return Err(EmbeddingError::service_unavailable("simulated failure")),
                None => {}
            }
        }

        Ok(self.generate_embedding(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "sim"
    }
}
