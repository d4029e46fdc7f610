//! Tier 2 - Fact store
//!
//! `TigerStyle`: Structured records indexed by session and `consolidated`
//! flag. The flag moves false to true at most once per fact, and a batch
//! transition is all-or-nothing.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{StorageError, StorageResult};
use super::records::Fact;
use crate::dst::FaultInjector;

/// Tier-2 store.
#[async_trait]
pub trait FactStore: Send + Sync + Debug {
    /// Insert a fact. Returns `Ok(false)` if a fact with this id already
    /// exists, leaving the stored fact untouched.
    async fn insert(&self, fact: Fact) -> StorageResult<bool>;

    /// Fetch one fact.
    async fn get(&self, id: &str) -> StorageResult<Option<Fact>>;

    /// Unconsolidated facts of a session ordered by `(observed_at, id)`.
    async fn list_unconsolidated(&self, session_id: &str) -> StorageResult<Vec<Fact>>;

    /// All facts of a session ordered by `(observed_at, id)`.
    async fn list_by_session(&self, session_id: &str) -> StorageResult<Vec<Fact>>;

    /// Sessions holding unconsolidated facts, oldest backlog first.
    async fn sessions_with_unconsolidated(&self) -> StorageResult<Vec<String>>;

    /// Unconsolidated facts in one session, or in all sessions.
    async fn unconsolidated_count(&self, session_id: Option<&str>) -> StorageResult<usize>;

    /// Atomically flag every fact in `fact_ids` consolidated into `episode_id`.
    ///
    /// Fails with `Conflict` and changes nothing if any fact is already
    /// consolidated, and with `NotFound` if any fact is missing.
    async fn mark_consolidated(&self, fact_ids: &[String], episode_id: &str) -> StorageResult<()>;
}

// =============================================================================
// SimFactStore
// =============================================================================

/// In-memory fact store with fault injection.
#[derive(Debug, Clone)]
pub struct SimFactStore {
    facts: Arc<RwLock<HashMap<String, Fact>>>,
    fault_injector: Arc<FaultInjector>,
}

impl SimFactStore {
    /// Create a store sharing the given fault injector.
    #[must_use]
    pub fn new(fault_injector: Arc<FaultInjector>) -> Self {
        Self {
            facts: Arc::new(RwLock::new(HashMap::new())),
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

    fn sorted(mut facts: Vec<Fact>) -> Vec<Fact> {
        facts.sort_by(|a, b| (a.observed_at, &a.id).cmp(&(b.observed_at, &b.id)));
        facts
    }

    /// Total facts held (for tests).
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.facts.read().unwrap().len()
    }
}

#[async_trait]
impl FactStore for SimFactStore {
    #[tracing::instrument(skip(self, fact), fields(fact_id = %fact.id))]
    async fn insert(&self, fact: Fact) -> StorageResult<bool> {
        self.maybe_inject_fault("fact_insert")?;
        fact.validate().map_err(StorageError::validation)?;

        let mut facts = self.facts.write().unwrap();
        if facts.contains_key(&fact.id) {
            tracing::debug!(fact_id = %fact.id, "fact already stored");
            return Ok(false);
        }
        facts.insert(fact.id.clone(), fact);
        Ok(true)
    }

    async fn get(&self, id: &str) -> StorageResult<Option<Fact>> {
        self.maybe_inject_fault("fact_read")?;
        Ok(self.facts.read().unwrap().get(id).cloned())
    }

    async fn list_unconsolidated(&self, session_id: &str) -> StorageResult<Vec<Fact>> {
        self.maybe_inject_fault("fact_read")?;

        let facts = self.facts.read().unwrap();
        Ok(Self::sorted(
            facts
                .values()
                .filter(|f| f.session_id == session_id && !f.consolidated)
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_session(&self, session_id: &str) -> StorageResult<Vec<Fact>> {
        self.maybe_inject_fault("fact_read")?;

        let facts = self.facts.read().unwrap();
        Ok(Self::sorted(
            facts
                .values()
                .filter(|f| f.session_id == session_id)
                .cloned()
                .collect(),
        ))
    }

    async fn sessions_with_unconsolidated(&self) -> StorageResult<Vec<String>> {
        self.maybe_inject_fault("fact_read")?;

        let facts = self.facts.read().unwrap();
        let mut oldest: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for fact in facts.values().filter(|f| !f.consolidated) {
            oldest
                .entry(fact.session_id.as_str())
                .and_modify(|ts| *ts = (*ts).min(fact.observed_at))
                .or_insert(fact.observed_at);
        }

        let mut sessions: Vec<(DateTime<Utc>, &str)> =
            oldest.into_iter().map(|(id, ts)| (ts, id)).collect();
        sessions.sort_unstable();
        Ok(sessions.into_iter().map(|(_, id)| id.to_string()).collect())
    }

    async fn unconsolidated_count(&self, session_id: Option<&str>) -> StorageResult<usize> {
        self.maybe_inject_fault("fact_read")?;

        let facts = self.facts.read().unwrap();
        Ok(facts
            .values()
            .filter(|f| !f.consolidated && session_id.map_or(true, |s| f.session_id == s))
            .count())
    }

    #[tracing::instrument(skip(self, fact_ids), fields(fact_count = fact_ids.len()))]
    async fn mark_consolidated(&self, fact_ids: &[String], episode_id: &str) -> StorageResult<()> {
        self.maybe_inject_fault("fact_mark_consolidated")?;
        assert!(!fact_ids.is_empty(), "must mark at least one fact");

        let mut facts = self.facts.write().unwrap();

        // Check every fact before touching any of them.
        for id in fact_ids {
            let fact = facts.get(id).ok_or_else(|| StorageError::not_found(id))?;
            if let Some(existing) = &fact.episode_id {
                return Err(StorageError::conflict(
                    id,
                    format!("already consolidated into {existing}"),
                ));
            }
        }

        for id in fact_ids {
            if let Some(fact) = facts.get_mut(id) {
                fact.consolidated = true;
                fact.episode_id = Some(episode_id.to_string());
            }
        }
        Ok(())
    }
}
