//! Tier 4 - Knowledge store
//!
//! `TigerStyle`: Write-once semantic index. Units are terminal and never
//! updated after indexing.
//!
//! A unit is staged first and invisible to `get`, `search` and `count` until
//! it is published, so a unit whose episodes were never marked distilled is
//! never seen by readers.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use super::records::KnowledgeUnit;
use crate::constants::{KNOWLEDGE_CONTENT_BYTES_MAX, SEARCH_RESULTS_COUNT_MAX};
use crate::dst::FaultInjector;
use crate::lifecycle::clusterer::normalized_terms;

/// One knowledge search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeHit {
    /// The matching unit
    pub unit: KnowledgeUnit,
    /// Fraction of query terms present in the unit, in (0, 1]
    pub score: f64,
}

/// Tier-4 store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync + Debug {
    /// Stage a unit without making it visible. Returns `Ok(false)` if a unit
    /// with this id is already staged or published; the stored unit is never
    /// replaced.
    async fn stage(&self, unit: KnowledgeUnit) -> StorageResult<bool>;

    /// Make a staged unit visible. Publishing twice is not an error.
    async fn publish(&self, id: &str) -> StorageResult<()>;

    /// Drop a staged unit.
    ///
    /// Returns `Ok(false)` and keeps the unit if it is already published.
    /// Discarding a missing id returns `Ok(true)`.
    async fn discard_staged(&self, id: &str) -> StorageResult<bool>;

    /// Units staged but not yet published.
    async fn staged(&self) -> StorageResult<Vec<KnowledgeUnit>>;

    /// Fetch one published unit.
    async fn get(&self, id: &str) -> StorageResult<Option<KnowledgeUnit>>;

    /// Published units sharing terms with `query`, best match first.
    async fn search(&self, query: &str, limit: usize) -> StorageResult<Vec<KnowledgeHit>>;

    /// Number of published units.
    async fn count(&self) -> StorageResult<usize>;
}

// =============================================================================
// SimKnowledgeStore
// =============================================================================

#[derive(Debug, Default)]
struct KnowledgeState {
    published: HashMap<String, KnowledgeUnit>,
    staged: HashMap<String, KnowledgeUnit>,
}

/// In-memory knowledge store with fault injection.
#[derive(Debug, Clone)]
pub struct SimKnowledgeStore {
    state: Arc<RwLock<KnowledgeState>>,
    fault_injector: Arc<FaultInjector>,
}

impl SimKnowledgeStore {
    /// Create a store sharing the given fault injector.
    #[must_use]
    pub fn new(fault_injector: Arc<FaultInjector>) -> Self {
        Self {
            state: Arc::new(RwLock::new(KnowledgeState::default())),
            fault_injector,
        }
    }

    fn maybe_inject_fault(&self, operation: &str) -> StorageResult<()> {
        match self.fault_injector.should_inject(operation) {
            Some(fault) => Err(StorageError::simulated_fault(format!(
                "{} during {operation}",
                fault.as_str()
            ))),
            None => Ok(()),
        }
    }

    /// Units staged but not yet published (for tests).
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.state.read().unwrap().staged.len()
    }
}

#[async_trait]
impl KnowledgeStore for SimKnowledgeStore {
    #[tracing::instrument(skip(self, unit), fields(unit_id = %unit.id))]
    async fn stage(&self, unit: KnowledgeUnit) -> StorageResult<bool> {
        self.maybe_inject_fault("knowledge_index")?;

        if unit.content.is_empty() || unit.content.len() > KNOWLEDGE_CONTENT_BYTES_MAX {
            return Err(StorageError::validation(format!(
                "knowledge content must be 1..={KNOWLEDGE_CONTENT_BYTES_MAX} bytes"
            )));
        }
        if unit.source_episode_ids.is_empty() {
            return Err(StorageError::validation(
                "knowledge unit must reference at least one episode",
            ));
        }

        let mut state = self.state.write().unwrap();
        if state.published.contains_key(&unit.id) || state.staged.contains_key(&unit.id) {
            return Ok(false);
        }
        state.staged.insert(unit.id.clone(), unit);
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn publish(&self, id: &str) -> StorageResult<()> {
        self.maybe_inject_fault("knowledge_publish")?;

        let mut state = self.state.write().unwrap();
        if let Some(unit) = state.staged.remove(id) {
            state.published.insert(unit.id.clone(), unit);
            return Ok(());
        }
        if state.published.contains_key(id) {
            Ok(())
        } else {
            Err(StorageError::not_found(id))
        }
    }

    async fn discard_staged(&self, id: &str) -> StorageResult<bool> {
        self.maybe_inject_fault("knowledge_discard")?;

        let mut state = self.state.write().unwrap();
        state.staged.remove(id);
        Ok(!state.published.contains_key(id))
    }

    async fn staged(&self) -> StorageResult<Vec<KnowledgeUnit>> {
        self.maybe_inject_fault("knowledge_read")?;

        let state = self.state.read().unwrap();
        let mut units: Vec<KnowledgeUnit> = state.staged.values().cloned().collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(units)
    }

    async fn get(&self, id: &str) -> StorageResult<Option<KnowledgeUnit>> {
        self.maybe_inject_fault("knowledge_read")?;
        Ok(self.state.read().unwrap().published.get(id).cloned())
    }

    async fn search(&self, query: &str, limit: usize) -> StorageResult<Vec<KnowledgeHit>> {
        self.maybe_inject_fault("knowledge_read")?;

        let query_terms = normalized_terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().unwrap();
        #[allow(clippy::cast_precision_loss)]
        let mut hits: Vec<KnowledgeHit> = state
            .published
            .values()
            .filter_map(|unit| {
                let terms = normalized_terms(&unit.content);
                let shared = query_terms.intersection(&terms).count();
                (shared > 0).then(|| KnowledgeHit {
                    unit: unit.clone(),
                    score: shared as f64 / query_terms.len() as f64,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.unit.id.cmp(&b.unit.id))
        });
        hits.truncate(limit.min(SEARCH_RESULTS_COUNT_MAX));

        debug_assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
        Ok(hits)
    }

    async fn count(&self) -> StorageResult<usize> {
        self.maybe_inject_fault("knowledge_read")?;
        Ok(self.state.read().unwrap().published.len())
    }
}
