//! ConsolidationEngine - Tier 2 -> Tier 3
//!
//! `TigerStyle`: An episode is one logical write across two indexes.
//!
//! ```text
//! unconsolidated facts ─► cluster ─► summarize ─► embed
//!                                                  │
//!            ┌─────────────────────────────────────┘
//!            ▼
//!   vector.upsert ──fail──► unit failed, nothing visible
//!            │
//!   graph.upsert (pending) ──fail──► vector.delete, unit failed
//!            │
//!   mark_consolidated ─fail─► discard pending graph entry + vector, unit failed
//!            │
//!   graph.commit ─fail─► unit failed, next run commits it
//!            │
//!   CONSOLIDATE event
//! ```
//!
//! The episode id is a digest of its fact ids, so the next pass over the
//! same facts rewrites the same id. Each session run starts by settling
//! pending graph entries left by an earlier run: an entry whose facts all
//! point at it is committed, any other is discarded.

use std::sync::Arc;

use super::clusterer::EpisodeClusterer;
use super::config::RetryPolicy;
use super::error::LifecycleError;
use super::locks::SessionLocks;
use super::retry::retry_with_backoff;
use super::synthesizer::KnowledgeSynthesizer;
use super::RunScope;
use crate::clock::Clock;
use crate::embedding::{validate_dimensions, EmbeddingError, EmbeddingProvider};
use crate::events::{CognitiveEvent, CognitiveEventBus, Component, Decision};
use crate::storage::{
    episode_id, Episode, EpisodeGraphIndex, EpisodeVectorIndex, Fact, FactStore, StorageError,
};

/// Counts from a consolidation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationOutcome {
    /// Sessions visited
    pub sessions: usize,
    /// Unconsolidated facts read
    pub facts_considered: usize,
    /// Sessions left alone because their backlog was below the buffer
    pub below_buffer: usize,
    /// Episodes written and committed
    pub episodes_written: usize,
    /// Pending episodes from an earlier run, committed now
    pub recovered: usize,
    /// Clusters another run had already committed
    pub noops: usize,
    /// Clusters that failed and stay unconsolidated
    pub failures: usize,
    /// Whether every failure was retryable
    pub retryable: bool,
    /// Last failure message
    pub last_error: Option<String>,
}

impl ConsolidationOutcome {
    fn absorb(&mut self, other: Self) {
        self.sessions += other.sessions;
        self.facts_considered += other.facts_considered;
        self.below_buffer += other.below_buffer;
        self.episodes_written += other.episodes_written;
        self.recovered += other.recovered;
        self.noops += other.noops;
        self.record_failures(other.failures, other.retryable, other.last_error);
    }

    fn record_failure(&mut self, error: &LifecycleError) {
        self.record_failures(1, error.is_retryable(), Some(error.to_string()));
    }

    fn record_failures(&mut self, failures: usize, retryable: bool, last: Option<String>) {
        if failures == 0 {
            return;
        }
        self.retryable = if self.failures == 0 {
            retryable
        } else {
            self.retryable && retryable
        };
        self.failures += failures;
        if last.is_some() {
            self.last_error = last;
        }
    }
}

enum UnitResult {
    Written(String),
    AlreadyCommitted,
}

/// Drives Tier-2 to Tier-3 migration.
pub struct ConsolidationEngine {
    facts: Arc<dyn FactStore>,
    vector: Arc<dyn EpisodeVectorIndex>,
    graph: Arc<dyn EpisodeGraphIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    synthesizer: KnowledgeSynthesizer,
    clusterer: EpisodeClusterer,
    bus: CognitiveEventBus,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    buffer_min: usize,
    locks: SessionLocks,
}

impl ConsolidationEngine {
    /// Create an engine. Unforced runs skip sessions with fewer than
    /// `buffer_min` unconsolidated facts.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        facts: Arc<dyn FactStore>,
        vector: Arc<dyn EpisodeVectorIndex>,
        graph: Arc<dyn EpisodeGraphIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        synthesizer: KnowledgeSynthesizer,
        clusterer: EpisodeClusterer,
        bus: CognitiveEventBus,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        buffer_min: usize,
    ) -> Self {
        Self {
            facts,
            vector,
            graph,
            embedder,
            synthesizer,
            clusterer,
            bus,
            clock,
            retry,
            buffer_min,
            locks: SessionLocks::new(),
        }
    }

    /// Consolidate the facts in `scope`. With `force`, the buffer minimum is
    /// ignored.
    ///
    /// # Errors
    /// Returns `LifecycleError` only if the backlog cannot be listed. Cluster
    /// failures are counted in the outcome and retried by the next run.
    #[tracing::instrument(skip(self))]
    pub async fn consolidate(
        &self,
        scope: &RunScope,
        force: bool,
    ) -> Result<ConsolidationOutcome, LifecycleError> {
        let sessions = match scope {
            RunScope::Session(session_id) => vec![session_id.clone()],
            RunScope::All => {
                let mut sessions = self.facts.sessions_with_unconsolidated().await?;
                for episode in self.graph.pending(None).await? {
                    if !sessions.contains(&episode.session_id) {
                        sessions.push(episode.session_id);
                    }
                }
                sessions
            }
        };

        let mut total = ConsolidationOutcome::default();
        for session_id in sessions {
            match self.consolidate_session(&session_id, force).await {
                Ok(outcome) => total.absorb(outcome),
                Err(error) => {
                    tracing::warn!(session_id = %session_id, error = %error, "consolidation failed");
                    total.sessions += 1;
                    total.record_failure(&error);
                }
            }
        }

        if total.episodes_written > 0 || total.failures > 0 {
            tracing::info!(
                sessions = total.sessions,
                episodes = total.episodes_written,
                failures = total.failures,
                "consolidation run finished"
            );
        }
        Ok(total)
    }

    async fn consolidate_session(
        &self,
        session_id: &str,
        force: bool,
    ) -> Result<ConsolidationOutcome, LifecycleError> {
        let _guard = self.locks.lock(session_id).await;

        let mut outcome = ConsolidationOutcome {
            sessions: 1,
            ..ConsolidationOutcome::default()
        };
        self.settle_pending(session_id, &mut outcome).await?;

        let facts = self.facts.list_unconsolidated(session_id).await?;
        outcome.facts_considered = facts.len();
        if facts.is_empty() {
            return Ok(outcome);
        }
        if !force && facts.len() < self.buffer_min {
            tracing::debug!(
                session_id,
                facts = facts.len(),
                buffer_min = self.buffer_min,
                "below consolidation buffer"
            );
            outcome.below_buffer = 1;
            return Ok(outcome);
        }

        let clusters = self.clusterer.cluster(&facts)?;
        for cluster in clusters {
            let members: Vec<Fact> = cluster.members.iter().map(|&i| facts[i].clone()).collect();
            match self.write_episode(session_id, &members).await {
                Ok(UnitResult::Written(id)) => {
                    tracing::debug!(episode_id = %id, facts = members.len(), "episode committed");
                    outcome.episodes_written += 1;
                }
                Ok(UnitResult::AlreadyCommitted) => outcome.noops += 1,
                Err(error) => {
                    tracing::warn!(session_id, error = %error, "episode write failed");
                    outcome.record_failure(&error);
                }
            }
        }
        Ok(outcome)
    }

    async fn write_episode(
        &self,
        session_id: &str,
        members: &[Fact],
    ) -> Result<UnitResult, LifecycleError> {
        assert!(!members.is_empty(), "cluster must have members");

        let fact_ids: Vec<String> = members.iter().map(|f| f.id.clone()).collect();
        let id = episode_id(&fact_ids);

        let draft = self.synthesizer.summarize_episode(members).await?;
        let embedding = self.embed(&draft.summary).await?;

        let episode = Episode {
            id: id.clone(),
            session_id: session_id.to_string(),
            source_fact_ids: fact_ids.clone(),
            summary: draft.summary,
            embedding,
            entities: draft.entities,
            relations: draft.relations,
            distilled: false,
            knowledge_unit_id: None,
            observed_at: members
                .iter()
                .map(|f| f.observed_at)
                .max()
                .unwrap_or_else(|| self.clock.now()),
            created_at: self.clock.now(),
        };

        self.vector.upsert(&episode).await?;
        if let Err(error) = self.graph.upsert(&episode).await {
            self.discard_episode(&id).await;
            return Err(error.into());
        }

        match self.facts.mark_consolidated(&fact_ids, &id).await {
            Ok(()) => {}
            Err(error @ StorageError::Conflict { .. }) => {
                if self.committed_as(&fact_ids, &id).await? {
                    tracing::debug!(episode_id = %id, "episode already committed");
                    self.graph.commit(&id).await?;
                    return Ok(UnitResult::AlreadyCommitted);
                }
                self.discard_episode(&id).await;
                return Err(error.into());
            }
            Err(error) => {
                self.discard_episode(&id).await;
                return Err(error.into());
            }
        }

        self.graph.commit(&id).await?;
        self.announce(
            &id,
            members.len(),
            format!(
                "{} facts from session {session_id} share topic and time window",
                members.len()
            ),
        );
        Ok(UnitResult::Written(id))
    }

    /// Commit pending entries whose facts already point at them and discard
    /// the rest. Runs under the session lock, so no entry here is in flight.
    async fn settle_pending(
        &self,
        session_id: &str,
        outcome: &mut ConsolidationOutcome,
    ) -> Result<(), LifecycleError> {
        for episode in self.graph.pending(Some(session_id)).await? {
            let settled = match self.committed_as(&episode.source_fact_ids, &episode.id).await {
                Ok(true) => self.graph.commit(&episode.id).await,
                Ok(false) => {
                    self.discard_episode(&episode.id).await;
                    continue;
                }
                Err(error) => Err(error),
            };
            match settled {
                Ok(()) => {
                    tracing::info!(episode_id = %episode.id, "committed pending episode");
                    outcome.recovered += 1;
                    let count = episode.source_fact_ids.len();
                    self.announce(
                        &episode.id,
                        count,
                        format!("{count} facts were already marked with this episode"),
                    );
                }
                Err(error) => {
                    tracing::warn!(episode_id = %episode.id, error = %error, "episode still pending");
                    outcome.record_failure(&LifecycleError::from(error));
                }
            }
        }
        Ok(())
    }

    fn announce(&self, episode_id: &str, fact_count: usize, justification: String) {
        self.bus.publish(CognitiveEvent::new(
            Component::Consolidation,
            episode_id.to_string(),
            Decision::Consolidate {
                episode_id: episode_id.to_string(),
                fact_count,
            },
            justification,
            self.clock.now(),
        ));
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LifecycleError> {
        let embedding = retry_with_backoff(
            &self.retry,
            self.clock.as_ref(),
            "summary_embedding",
            EmbeddingError::is_retryable,
            || self.embedder.embed(text),
        )
        .await
        .map_err(|failure| failure.error)?;
        validate_dimensions(&embedding, self.embedder.dimensions())?;
        Ok(embedding)
    }

    /// Whether every fact already points at `id`.
    async fn committed_as(&self, fact_ids: &[String], id: &str) -> Result<bool, StorageError> {
        for fact_id in fact_ids {
            let fact = self.facts.get(fact_id).await?;
            if fact.and_then(|f| f.episode_id).as_deref() != Some(id) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn discard_vector(&self, id: &str) {
        if let Err(error) = self.vector.delete(id).await {
            tracing::warn!(episode_id = %id, error = %error, "orphaned vector entry");
        }
    }

    /// Graph side first. A committed entry, possibly already distilled, is
    /// never removed, and neither is its vector.
    async fn discard_episode(&self, id: &str) {
        match self.graph.discard_pending(id).await {
            Ok(true) => self.discard_vector(id).await,
            Ok(false) => tracing::debug!(episode_id = %id, "keeping committed episode"),
            Err(error) => {
                tracing::warn!(episode_id = %id, error = %error, "pending graph entry left behind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dst::{DeterministicRng, FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType, SimClock};
    use crate::embedding::SimEmbeddingProvider;
    use crate::events::{EventReceiver, EventType};
    use crate::lifecycle::ClusterConfig;
    use crate::llm::SimLLMProvider;
    use crate::lifecycle::DistillationEngine;
    use crate::storage::{
        EpisodeFilter, KnowledgeStore, SimEpisodeGraphIndex, SimEpisodeVectorIndex, SimFactStore,
        SimKnowledgeStore, StorageResult,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    struct Fixture {
        engine: ConsolidationEngine,
        facts: Arc<SimFactStore>,
        vector: Arc<SimEpisodeVectorIndex>,
        graph: Arc<SimEpisodeGraphIndex>,
        events: EventReceiver,
    }

    fn fixture(faults: FaultInjector, buffer_min: usize) -> Fixture {
        let faults = Arc::new(faults);
        let facts = Arc::new(SimFactStore::new(Arc::clone(&faults)));
        fixture_over(facts.clone(), facts, faults, buffer_min)
    }

    /// Engine writing facts through `store`, which wraps `facts`.
    fn fixture_over(
        store: Arc<dyn FactStore>,
        facts: Arc<SimFactStore>,
        faults: Arc<FaultInjector>,
        buffer_min: usize,
    ) -> Fixture {
        let vector = Arc::new(SimEpisodeVectorIndex::new(Arc::clone(&faults)));
        let graph = Arc::new(SimEpisodeGraphIndex::new(Arc::clone(&faults)));
        let clock: Arc<dyn Clock> = Arc::new(SimClock::at_ms(10_000_000));
        let (bus, events) = CognitiveEventBus::new(64);
        let engine = ConsolidationEngine::new(
            store,
            vector.clone(),
            graph.clone(),
            Arc::new(SimEmbeddingProvider::with_seed(7)),
            KnowledgeSynthesizer::new(
                Arc::new(SimLLMProvider::with_seed(42)),
                RetryPolicy::default(),
                Arc::clone(&clock),
            ),
            EpisodeClusterer::new(ClusterConfig::default()),
            bus,
            clock,
            RetryPolicy::default(),
            buffer_min,
        );
        Fixture {
            engine,
            facts,
            vector,
            graph,
            events,
        }
    }

    fn no_faults() -> FaultInjector {
        FaultInjector::new(DeterministicRng::new(0))
    }

    /// Holds the first `mark_consolidated` until released, then fails it.
    #[derive(Debug)]
    struct HeldMarkStore {
        inner: Arc<SimFactStore>,
        held: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl HeldMarkStore {
        fn new(inner: Arc<SimFactStore>) -> Self {
            Self {
                inner,
                held: AtomicBool::new(false),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl FactStore for HeldMarkStore {
        async fn insert(&self, fact: Fact) -> StorageResult<bool> {
            self.inner.insert(fact).await
        }

        async fn get(&self, id: &str) -> StorageResult<Option<Fact>> {
            self.inner.get(id).await
        }

        async fn list_unconsolidated(&self, session_id: &str) -> StorageResult<Vec<Fact>> {
            self.inner.list_unconsolidated(session_id).await
        }

        async fn list_by_session(&self, session_id: &str) -> StorageResult<Vec<Fact>> {
            self.inner.list_by_session(session_id).await
        }

        async fn sessions_with_unconsolidated(&self) -> StorageResult<Vec<String>> {
            self.inner.sessions_with_unconsolidated().await
        }

        async fn unconsolidated_count(&self, session_id: Option<&str>) -> StorageResult<usize> {
            self.inner.unconsolidated_count(session_id).await
        }

        async fn mark_consolidated(&self, fact_ids: &[String], episode_id: &str) -> StorageResult<()> {
            if self.held.swap(true, Ordering::SeqCst) {
                return self.inner.mark_consolidated(fact_ids, episode_id).await;
            }
            self.entered.notify_one();
            self.release.notified().await;
            Err(StorageError::simulated_fault("write fail during fact_mark_consolidated"))
        }
    }

    fn distiller(f: &Fixture, knowledge: Arc<SimKnowledgeStore>) -> (DistillationEngine, EventReceiver) {
        let clock: Arc<dyn Clock> = Arc::new(SimClock::at_ms(20_000_000));
        let (bus, events) = CognitiveEventBus::new(16);
        let engine = DistillationEngine::new(
            f.vector.clone(),
            f.graph.clone(),
            knowledge,
            KnowledgeSynthesizer::new(
                Arc::new(SimLLMProvider::with_seed(9)),
                RetryPolicy::default(),
                Arc::clone(&clock),
            ),
            EpisodeClusterer::new(ClusterConfig::default()),
            bus,
            clock,
            1,
        );
        (engine, events)
    }

    fn fact(id: &str, session: &str, content: &str, secs: i64) -> Fact {
        let at = DateTime::UNIX_EPOCH + Duration::seconds(secs);
        Fact {
            id: id.to_string(),
            session_id: session.to_string(),
            source_turn_ids: vec![format!("turn-{id}")],
            content: content.to_string(),
            certainty: 0.9,
            impact: 0.8,
            score: 0.72,
            scored_at: at,
            justification: "stated directly".to_string(),
            observed_at: at,
            consolidated: false,
            episode_id: None,
            created_at: at,
        }
    }

    async fn seed_acme(store: &SimFactStore, session: &str) {
        store
            .insert(fact("f1", session, "Alice works at Acme robotics in Oslo", 10))
            .await
            .unwrap();
        store
            .insert(fact("f2", session, "Alice leads the Acme robotics data team", 20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_consolidates_into_one_episode() {
        let mut f = fixture(no_faults(), 1);
        seed_acme(&f.facts, "s1").await;

        let outcome = f
            .engine
            .consolidate(&RunScope::Session("s1".into()), false)
            .await
            .unwrap();

        assert_eq!(outcome.episodes_written, 1);
        assert_eq!(outcome.failures, 0);
        let f1 = f.facts.get("f1").await.unwrap().unwrap();
        let f2 = f.facts.get("f2").await.unwrap().unwrap();
        assert!(f1.consolidated && f2.consolidated);
        assert_eq!(f1.episode_id, f2.episode_id);

        let id = f1.episode_id.unwrap();
        assert_eq!(id, episode_id(&["f1".to_string(), "f2".to_string()]));
        assert!(f.vector.exists(&id).await.unwrap());
        let episode = f.graph.get(&id).await.unwrap().unwrap();
        assert_eq!(episode.source_fact_ids, vec!["f1".to_string(), "f2".to_string()]);

        let events = f.events.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), EventType::Consolidate);
        assert_eq!(events[0].subject_id, id);
    }

    #[tokio::test]
    async fn test_below_buffer_waits_unless_forced() {
        let f = fixture(no_faults(), 8);
        seed_acme(&f.facts, "s1").await;
        let scope = RunScope::Session("s1".into());

        let waiting = f.engine.consolidate(&scope, false).await.unwrap();
        assert_eq!(waiting.below_buffer, 1);
        assert_eq!(waiting.episodes_written, 0);
        assert_eq!(f.facts.unconsolidated_count(Some("s1")).await.unwrap(), 2);

        let forced = f.engine.consolidate(&scope, true).await.unwrap();
        assert_eq!(forced.episodes_written, 1);
    }

    #[tokio::test]
    async fn test_graph_failure_leaves_nothing_visible() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(3))
            .with_fault(
                FaultConfig::new(FaultType::StorageWriteFail, 1.0)
                    .with_filter("episode_graph_upsert")
                    .with_max_injections(1),
            )
            .build();
        let f = fixture(faults, 1);
        seed_acme(&f.facts, "s1").await;
        let scope = RunScope::Session("s1".into());

        let failed = f.engine.consolidate(&scope, false).await.unwrap();

        assert_eq!(failed.failures, 1);
        assert!(failed.retryable);
        assert_eq!(f.facts.unconsolidated_count(Some("s1")).await.unwrap(), 2);
        assert_eq!(f.vector.count().await.unwrap(), 0);
        assert!(f.graph.filter(&EpisodeFilter::all()).await.unwrap().is_empty());

        let retried = f.engine.consolidate(&scope, false).await.unwrap();

        assert_eq!(retried.episodes_written, 1);
        let expected = episode_id(&["f1".to_string(), "f2".to_string()]);
        let f1 = f.facts.get("f1").await.unwrap().unwrap();
        assert_eq!(f1.episode_id.as_deref(), Some(expected.as_str()));
        assert!(f.vector.exists(&expected).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_failure_discards_both_sides() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(4))
            .with_fault(
                FaultConfig::new(FaultType::StorageWriteFail, 1.0)
                    .with_filter("fact_mark_consolidated")
                    .with_max_injections(1),
            )
            .build();
        let f = fixture(faults, 1);
        seed_acme(&f.facts, "s1").await;

        let outcome = f
            .engine
            .consolidate(&RunScope::Session("s1".into()), false)
            .await
            .unwrap();

        assert_eq!(outcome.failures, 1);
        assert_eq!(f.vector.count().await.unwrap(), 0);
        assert!(f.graph.filter(&EpisodeFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_settled_by_next_run() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(5))
            .with_fault(
                FaultConfig::new(FaultType::StorageWriteFail, 1.0)
                    .with_filter("episode_graph_commit")
                    .with_max_injections(1),
            )
            .build();
        let mut f = fixture(faults, 1);
        seed_acme(&f.facts, "s1").await;
        let expected = episode_id(&["f1".to_string(), "f2".to_string()]);

        let failed = f
            .engine
            .consolidate(&RunScope::Session("s1".into()), false)
            .await
            .unwrap();

        assert_eq!(failed.failures, 1);
        assert_eq!(f.facts.unconsolidated_count(Some("s1")).await.unwrap(), 0);
        assert!(f.graph.get(&expected).await.unwrap().is_none());
        assert_eq!(f.graph.pending(Some("s1")).await.unwrap().len(), 1);
        assert!(f.events.drain().is_empty());

        let settled = f.engine.consolidate(&RunScope::All, false).await.unwrap();

        assert_eq!(settled.recovered, 1);
        assert_eq!(settled.failures, 0);
        assert!(f.graph.get(&expected).await.unwrap().is_some());
        assert!(f.graph.pending(None).await.unwrap().is_empty());
        let events = f.events.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject_id, expected);
    }

    /// Distillation running while a fact mark is in flight must not pick up
    /// the episode, and the failed mark must not remove anything it needs.
    #[tokio::test]
    async fn test_distillation_never_sees_uncommitted_episode() {
        let faults = Arc::new(no_faults());
        let facts = Arc::new(SimFactStore::new(Arc::clone(&faults)));
        let held = Arc::new(HeldMarkStore::new(facts.clone()));
        let f = fixture_over(held.clone(), facts, faults, 1);
        seed_acme(&f.facts, "s1").await;
        let knowledge = Arc::new(SimKnowledgeStore::new(Arc::new(no_faults())));
        let (distiller, _distill_events) = distiller(&f, knowledge.clone());
        let scope = RunScope::Session("s1".into());

        let (failed, concurrent) = tokio::join!(f.engine.consolidate(&scope, true), async {
            held.entered.notified().await;
            let outcome = distiller.distill(&RunScope::All, true).await;
            held.release.notify_one();
            outcome
        });

        let failed = failed.unwrap();
        assert_eq!(failed.failures, 1);
        assert_eq!(concurrent.unwrap().episodes_considered, 0);
        assert_eq!(knowledge.count().await.unwrap(), 0);
        assert_eq!(knowledge.staged_count(), 0);
        assert_eq!(f.vector.count().await.unwrap(), 0);
        assert!(f.graph.pending(None).await.unwrap().is_empty());
        assert_eq!(f.facts.unconsolidated_count(Some("s1")).await.unwrap(), 2);

        let retried = f.engine.consolidate(&scope, true).await.unwrap();
        assert_eq!(retried.episodes_written, 1);
        let distilled = distiller.distill(&RunScope::All, true).await.unwrap();
        assert_eq!(distilled.units_written, 1);

        for fact_id in ["f1", "f2"] {
            let fact = f.facts.get(fact_id).await.unwrap().unwrap();
            let episode = f.graph.get(&fact.episode_id.unwrap()).await.unwrap().unwrap();
            assert!(episode.distilled);
            let unit_id = episode.knowledge_unit_id.unwrap();
            assert!(knowledge.get(&unit_id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_all_scope_visits_every_session() {
        let f = fixture(no_faults(), 1);
        seed_acme(&f.facts, "s1").await;
        f.facts
            .insert(fact("g1", "s2", "Bob adopted a greyhound named Pixel", 30))
            .await
            .unwrap();

        let outcome = f.engine.consolidate(&RunScope::All, false).await.unwrap();

        assert_eq!(outcome.sessions, 2);
        assert_eq!(outcome.episodes_written, 2);
        assert_eq!(f.facts.unconsolidated_count(None).await.unwrap(), 0);
        let s2 = f
            .graph
            .filter(&EpisodeFilter::all().session("s2"))
            .await
            .unwrap();
        assert_eq!(s2.len(), 1);
        assert_eq!(s2[0].session_id, "s2");
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let mut f = fixture(no_faults(), 1);
        seed_acme(&f.facts, "s1").await;
        let scope = RunScope::Session("s1".into());

        f.engine.consolidate(&scope, true).await.unwrap();
        f.events.drain();
        let again = f.engine.consolidate(&scope, true).await.unwrap();

        assert_eq!(again.episodes_written, 0);
        assert_eq!(again.facts_considered, 0);
        assert!(f.events.drain().is_empty());
    }
}
