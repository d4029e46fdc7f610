//! Tier 3 - Episode dual index
//!
//! `TigerStyle`: Two independent indexes sharing one id space.
//!
//! ```text
//! ┌──────────────────────────┐      ┌───────────────────────────┐
//! │   EpisodeVectorIndex     │      │    EpisodeGraphIndex      │
//! │  id -> embedding (ANN)   │      │ id -> episode + metadata  │
//! │  search_similar()        │      │ entity -> ids, relations  │
//! └──────────────────────────┘      │ filter() exact scan       │
//!                                   └───────────────────────────┘
//! ```
//!
//! "Every episode of session S" or "every episode mentioning entity E" is
//! answered by `EpisodeGraphIndex::filter`, an exact scan. Similarity
//! search never stands in for it.
//!
//! A graph entry is pending from its first upsert until `commit`. Pending
//! entries are invisible to every read except `pending`, so an episode whose
//! facts are not yet marked consolidated can never be distilled.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use super::records::{Episode, Relation};
use crate::constants::SEARCH_RESULTS_COUNT_MAX;
use crate::dst::FaultInjector;

// =============================================================================
// Query Types
// =============================================================================

/// One similarity search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityHit {
    /// Episode id
    pub episode_id: String,
    /// Cosine similarity mapped to [0, 1]
    pub score: f32,
}

/// Exact metadata filter over episodes. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeFilter {
    /// Only this session
    pub session_id: Option<String>,
    /// Only episodes mentioning this entity (case-insensitive)
    pub entity: Option<String>,
    /// Only episodes with this `distilled` flag
    pub distilled: Option<bool>,
}

impl EpisodeFilter {
    /// Match every episode.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one session.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Restrict to one entity.
    #[must_use]
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Restrict to undistilled episodes.
    #[must_use]
    pub fn undistilled(mut self) -> Self {
        self.distilled = Some(false);
        self
    }

    fn matches(&self, episode: &Episode) -> bool {
        self.session_id
            .as_ref()
            .map_or(true, |s| &episode.session_id == s)
            && self.distilled.map_or(true, |d| episode.distilled == d)
            && self.entity.as_ref().map_or(true, |e| {
                episode.entities.iter().any(|x| x.eq_ignore_ascii_case(e))
            })
    }
}

// =============================================================================
// Index Traits
// =============================================================================

/// Approximate-nearest-neighbour side of Tier 3.
#[async_trait]
pub trait EpisodeVectorIndex: Send + Sync + Debug {
    /// Insert or replace the embedding for `episode.id`.
    async fn upsert(&self, episode: &Episode) -> StorageResult<()>;

    /// Remove an entry. Removing a missing id is not an error.
    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Whether an entry exists.
    async fn exists(&self, id: &str) -> StorageResult<bool>;

    /// The `limit` entries most similar to `embedding`.
    async fn search_similar(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<SimilarityHit>>;

    /// Number of entries.
    async fn count(&self) -> StorageResult<usize>;
}

/// Exact relational/graph side of Tier 3.
#[async_trait]
pub trait EpisodeGraphIndex: Send + Sync + Debug {
    /// Insert or replace an episode and its entity edges. A new id starts
    /// pending; replacing keeps the stored commit and `distilled` state.
    async fn upsert(&self, episode: &Episode) -> StorageResult<()>;

    /// Make a pending entry visible. Committing twice is not an error.
    async fn commit(&self, id: &str) -> StorageResult<()>;

    /// Remove a pending entry and its edges.
    ///
    /// Returns `Ok(false)` and keeps the entry if it is committed. Removing
    /// a missing id returns `Ok(true)`.
    async fn discard_pending(&self, id: &str) -> StorageResult<bool>;

    /// Pending entries in one session, or in all sessions.
    async fn pending(&self, session_id: Option<&str>) -> StorageResult<Vec<Episode>>;

    /// Fetch one committed episode.
    async fn get(&self, id: &str) -> StorageResult<Option<Episode>>;

    /// Exact filtered scan, ordered by `(observed_at, id)`.
    async fn filter(&self, filter: &EpisodeFilter) -> StorageResult<Vec<Episode>>;

    /// Relations touching `entity` across all episodes.
    async fn relations_of(&self, entity: &str) -> StorageResult<Vec<Relation>>;

    /// Undistilled episodes in one session, or in all sessions.
    async fn undistilled_count(&self, session_id: Option<&str>) -> StorageResult<usize>;

    /// Atomically flag episodes distilled into `unit_id`.
    ///
    /// Fails with `Conflict` and changes nothing if any episode is already
    /// distilled, and with `NotFound` if any is missing or pending.
    async fn mark_distilled(&self, episode_ids: &[String], unit_id: &str) -> StorageResult<()>;
}

fn inject(injector: &FaultInjector, operation: &str) -> StorageResult<()> {
    match injector.should_inject(operation) {
        Some(fault) => Err(StorageError::simulated_fault(format!(
            "{} during {operation}",
            fault.as_str()
        ))),
        None => Ok(()),
    }
}

// =============================================================================
// SimEpisodeVectorIndex
// =============================================================================

/// In-memory brute-force vector index with fault injection.
#[derive(Debug, Clone)]
pub struct SimEpisodeVectorIndex {
    embeddings: Arc<RwLock<HashMap<String, Vec<f32>>>>,
    fault_injector: Arc<FaultInjector>,
}

impl SimEpisodeVectorIndex {
    /// Create an index sharing the given fault injector.
    #[must_use]
    pub fn new(fault_injector: Arc<FaultInjector>) -> Self {
        Self {
            embeddings: Arc::new(RwLock::new(HashMap::new())),
            fault_injector,
        }
    }

    /// Cosine similarity mapped from [-1, 1] to [0, 1].
    fn similarity(a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vectors must have same length");

        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        (dot / (norm_a * norm_b) + 1.0) / 2.0
    }
}

#[async_trait]
impl EpisodeVectorIndex for SimEpisodeVectorIndex {
    #[tracing::instrument(skip(self, episode), fields(episode_id = %episode.id))]
    async fn upsert(&self, episode: &Episode) -> StorageResult<()> {
        inject(&self.fault_injector, "episode_vector_upsert")?;
        if episode.embedding.is_empty() {
            return Err(StorageError::validation("episode has no embedding"));
        }

        self.embeddings
            .write()
            .unwrap()
            .insert(episode.id.clone(), episode.embedding.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        inject(&self.fault_injector, "episode_vector_delete")?;
        self.embeddings.write().unwrap().remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> StorageResult<bool> {
        inject(&self.fault_injector, "episode_vector_read")?;
        Ok(self.embeddings.read().unwrap().contains_key(id))
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> StorageResult<Vec<SimilarityHit>> {
        inject(&self.fault_injector, "episode_vector_read")?;
        let limit = limit.min(SEARCH_RESULTS_COUNT_MAX);

        let embeddings = self.embeddings.read().unwrap();
        let mut hits: Vec<SimilarityHit> = embeddings
            .iter()
            .filter(|(_, stored)| stored.len() == embedding.len())
            .map(|(id, stored)| SimilarityHit {
                episode_id: id.clone(),
                score: Self::similarity(embedding, stored),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.episode_id.cmp(&b.episode_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> StorageResult<usize> {
        inject(&self.fault_injector, "episode_vector_read")?;
        Ok(self.embeddings.read().unwrap().len())
    }
}

// =============================================================================
// SimEpisodeGraphIndex
// =============================================================================

#[derive(Debug, Default)]
struct GraphState {
    episodes: HashMap<String, Episode>,
    /// Lowercased entity -> episode ids
    by_entity: HashMap<String, BTreeSet<String>>,
    /// Written but not yet committed
    pending: BTreeSet<String>,
}

impl GraphState {
    fn visible(&self, id: &str) -> Option<&Episode> {
        if self.pending.contains(id) {
            return None;
        }
        self.episodes.get(id)
    }

    fn unlink(&mut self, id: &str) -> Option<Episode> {
        let removed = self.episodes.remove(id)?;
        for entity in &removed.entities {
            let key = entity.to_lowercase();
            if let Some(ids) = self.by_entity.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_entity.remove(&key);
                }
            }
        }
        Some(removed)
    }
}

/// In-memory graph/metadata index with fault injection.
#[derive(Debug, Clone)]
pub struct SimEpisodeGraphIndex {
    state: Arc<RwLock<GraphState>>,
    fault_injector: Arc<FaultInjector>,
}

impl SimEpisodeGraphIndex {
    /// Create an index sharing the given fault injector.
    #[must_use]
    pub fn new(fault_injector: Arc<FaultInjector>) -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
            fault_injector,
        }
    }
}

#[async_trait]
impl EpisodeGraphIndex for SimEpisodeGraphIndex {
    #[tracing::instrument(skip(self, episode), fields(episode_id = %episode.id))]
    async fn upsert(&self, episode: &Episode) -> StorageResult<()> {
        inject(&self.fault_injector, "episode_graph_upsert")?;

        let mut state = self.state.write().unwrap();
        let mut stored = episode.clone();
        match state.unlink(&episode.id) {
            Some(previous) => {
                stored.distilled = previous.distilled;
                stored.knowledge_unit_id = previous.knowledge_unit_id;
            }
            None => {
                state.pending.insert(stored.id.clone());
            }
        }
        for entity in &stored.entities {
            state
                .by_entity
                .entry(entity.to_lowercase())
                .or_default()
                .insert(stored.id.clone());
        }
        state.episodes.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn commit(&self, id: &str) -> StorageResult<()> {
        inject(&self.fault_injector, "episode_graph_commit")?;

        let mut state = self.state.write().unwrap();
        if !state.episodes.contains_key(id) {
            return Err(StorageError::not_found(id));
        }
        state.pending.remove(id);
        Ok(())
    }

    async fn discard_pending(&self, id: &str) -> StorageResult<bool> {
        inject(&self.fault_injector, "episode_graph_delete")?;

        let mut state = self.state.write().unwrap();
        if !state.episodes.contains_key(id) {
            return Ok(true);
        }
        if !state.pending.remove(id) {
            return Ok(false);
        }
        state.unlink(id);
        Ok(true)
    }

    async fn pending(&self, session_id: Option<&str>) -> StorageResult<Vec<Episode>> {
        inject(&self.fault_injector, "episode_graph_read")?;

        let state = self.state.read().unwrap();
        Ok(state
            .pending
            .iter()
            .filter_map(|id| state.episodes.get(id))
            .filter(|e| session_id.map_or(true, |s| e.session_id == s))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<Episode>> {
        inject(&self.fault_injector, "episode_graph_read")?;
        Ok(self.state.read().unwrap().visible(id).cloned())
    }

    async fn filter(&self, filter: &EpisodeFilter) -> StorageResult<Vec<Episode>> {
        inject(&self.fault_injector, "episode_graph_read")?;

        let state = self.state.read().unwrap();
        let mut matched: Vec<Episode> = match &filter.entity {
            Some(entity) => state
                .by_entity
                .get(&entity.to_lowercase())
                .into_iter()
                .flatten()
                .filter_map(|id| state.visible(id))
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
            None => state
                .episodes
                .values()
                .filter(|e| !state.pending.contains(&e.id) && filter.matches(e))
                .cloned()
                .collect(),
        };
        matched.sort_by(|a, b| (a.observed_at, &a.id).cmp(&(b.observed_at, &b.id)));
        Ok(matched)
    }

    async fn relations_of(&self, entity: &str) -> StorageResult<Vec<Relation>> {
        inject(&self.fault_injector, "episode_graph_read")?;

        let state = self.state.read().unwrap();
        let relations: BTreeSet<Relation> = state
            .by_entity
            .get(&entity.to_lowercase())
            .into_iter()
            .flatten()
            .filter_map(|id| state.visible(id))
            .flat_map(|e| e.relations.iter())
            .filter(|r| r.source.eq_ignore_ascii_case(entity) || r.target.eq_ignore_ascii_case(entity))
            .cloned()
            .collect();
        Ok(relations.into_iter().collect())
    }

    async fn undistilled_count(&self, session_id: Option<&str>) -> StorageResult<usize> {
        inject(&self.fault_injector, "episode_graph_read")?;

        let state = self.state.read().unwrap();
        Ok(state
            .episodes
            .values()
            .filter(|e| {
                !e.distilled
                    && !state.pending.contains(&e.id)
                    && session_id.map_or(true, |s| e.session_id == s)
            })
            .count())
    }

    #[tracing::instrument(skip(self, episode_ids), fields(episode_count = episode_ids.len()))]
    async fn mark_distilled(&self, episode_ids: &[String], unit_id: &str) -> StorageResult<()> {
        inject(&self.fault_injector, "episode_mark_distilled")?;
        assert!(!episode_ids.is_empty(), "must mark at least one episode");

        let mut state = self.state.write().unwrap();
        for id in episode_ids {
            let episode = state.visible(id).ok_or_else(|| StorageError::not_found(id))?;
            if let Some(existing) = &episode.knowledge_unit_id {
                return Err(StorageError::conflict(
                    id,
                    format!("already distilled into {existing}"),
                ));
            }
        }
        for id in episode_ids {
            if let Some(episode) = state.episodes.get_mut(id) {
                episode.distilled = true;
                episode.knowledge_unit_id = Some(unit_id.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dst::DeterministicRng;
    use chrono::{DateTime, Duration};

    fn injector() -> Arc<FaultInjector> {
        Arc::new(FaultInjector::new(DeterministicRng::new(42)))
    }

    fn episode(id: &str, session: &str, entities: &[&str], embedding: Vec<f32>) -> Episode {
        let at = DateTime::UNIX_EPOCH + Duration::seconds(id.len() as i64);
        Episode {
            id: id.to_string(),
            session_id: session.to_string(),
            source_fact_ids: vec![format!("fact-{id}")],
            summary: format!("summary {id}"),
            embedding,
            entities: entities.iter().map(ToString::to_string).collect(),
            relations: vec![],
            distilled: false,
            knowledge_unit_id: None,
            observed_at: at,
            created_at: at,
        }
    }

    async fn put(graph: &SimEpisodeGraphIndex, episode: &Episode) {
        graph.upsert(episode).await.unwrap();
        graph.commit(&episode.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_filter_by_session_is_exact() {
        let graph = SimEpisodeGraphIndex::new(injector());
        put(&graph, &episode("a", "s1", &[], vec![1.0])).await;
        put(&graph, &episode("bb", "s2", &[], vec![1.0])).await;
        put(&graph, &episode("ccc", "s1", &[], vec![1.0])).await;

        let ids: Vec<String> = graph
            .filter(&EpisodeFilter::all().session("s1"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "ccc".to_string()]);
    }

    #[tokio::test]
    async fn test_filter_by_entity_case_insensitive() {
        let graph = SimEpisodeGraphIndex::new(injector());
        put(&graph, &episode("a", "s1", &["Alice", "Acme"], vec![1.0])).await;
        put(&graph, &episode("b", "s2", &["Bob"], vec![1.0])).await;

        let hits = graph.filter(&EpisodeFilter::all().entity("alice")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_upsert_keeps_distilled_state() {
        let graph = SimEpisodeGraphIndex::new(injector());
        let ep = episode("a", "s1", &["Alice"], vec![1.0]);
        put(&graph, &ep).await;
        graph.mark_distilled(&["a".to_string()], "k1").await.unwrap();

        graph.upsert(&ep).await.unwrap();

        let stored = graph.get("a").await.unwrap().unwrap();
        assert!(stored.distilled);
        assert_eq!(graph.undistilled_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_distilled_all_or_nothing() {
        let graph = SimEpisodeGraphIndex::new(injector());
        put(&graph, &episode("a", "s1", &[], vec![1.0])).await;
        put(&graph, &episode("b", "s1", &[], vec![1.0])).await;
        graph.mark_distilled(&["a".to_string()], "k1").await.unwrap();

        let result = graph
            .mark_distilled(&["b".to_string(), "a".to_string()], "k2")
            .await;

        assert!(matches!(result, Err(StorageError::Conflict { .. })));
        assert!(!graph.get("b").await.unwrap().unwrap().distilled);
    }

    #[tokio::test]
    async fn test_pending_entry_invisible_until_commit() {
        let graph = SimEpisodeGraphIndex::new(injector());
        graph.upsert(&episode("a", "s1", &["Alice"], vec![1.0])).await.unwrap();

        assert!(graph.get("a").await.unwrap().is_none());
        assert!(graph.filter(&EpisodeFilter::all()).await.unwrap().is_empty());
        assert!(graph.filter(&EpisodeFilter::all().entity("alice")).await.unwrap().is_empty());
        assert_eq!(graph.undistilled_count(None).await.unwrap(), 0);
        let result = graph.mark_distilled(&["a".to_string()], "k1").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
        assert_eq!(graph.pending(Some("s1")).await.unwrap().len(), 1);

        graph.commit("a").await.unwrap();

        assert!(graph.get("a").await.unwrap().is_some());
        assert_eq!(graph.undistilled_count(Some("s1")).await.unwrap(), 1);
        assert!(graph.pending(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_pending_keeps_committed_entry() {
        let graph = SimEpisodeGraphIndex::new(injector());
        let committed = episode("a", "s1", &[], vec![1.0]);
        put(&graph, &committed).await;
        graph.mark_distilled(&["a".to_string()], "k1").await.unwrap();
        graph.upsert(&episode("b", "s1", &[], vec![1.0])).await.unwrap();

        // Re-upserting a committed id does not make it pending again.
        graph.upsert(&committed).await.unwrap();

        assert!(!graph.discard_pending("a").await.unwrap());
        assert!(graph.discard_pending("b").await.unwrap());
        assert!(graph.discard_pending("missing").await.unwrap());
        let kept = graph.get("a").await.unwrap().unwrap();
        assert_eq!(kept.knowledge_unit_id.as_deref(), Some("k1"));
        assert!(graph.pending(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relations_of() {
        let graph = SimEpisodeGraphIndex::new(injector());
        let mut ep = episode("a", "s1", &["Alice", "Acme"], vec![1.0]);
        ep.relations = vec![Relation {
            source: "Alice".into(),
            relation: "works_at".into(),
            target: "Acme".into(),
        }];
        put(&graph, &ep).await;

        let relations = graph.relations_of("acme").await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation, "works_at");
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let index = SimEpisodeVectorIndex::new(injector());
        index.upsert(&episode("near", "s1", &[], vec![1.0, 0.1])).await.unwrap();
        index.upsert(&episode("far", "s1", &[], vec![-1.0, 0.0])).await.unwrap();

        let hits = index.search_similar(&[1.0, 0.0], 10).await.unwrap();

        assert_eq!(hits[0].episode_id, "near");
        assert!(hits[0].score > hits[1].score);
        assert!(index.exists("far").await.unwrap());
        index.delete("far").await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }
}
