//! DistillationEngine - Tier 3 -> Tier 4
//!
//! `TigerStyle`: One run at a time across the whole tier, since knowledge
//! units merge episodes from many sessions.
//!
//! ```text
//! undistilled episodes (committed graph entries, vector entry present)
//!   ─► cluster ─► synthesize ─► knowledge.stage (invisible)
//!   ─► mark_distilled (all-or-nothing) ──fail──► discard staged unit
//!   ─► knowledge.publish ─► DISTILL event
//! ```
//!
//! A unit only becomes visible once its episodes point at it. If a run
//! marks the episodes but fails to publish, the next run finds the staged
//! unit, sees the episodes marked with its id and publishes it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::clusterer::EpisodeClusterer;
use super::error::LifecycleError;
use super::synthesizer::KnowledgeSynthesizer;
use super::RunScope;
use crate::clock::Clock;
use crate::events::{CognitiveEvent, CognitiveEventBus, Component, Decision};
use crate::storage::{
    knowledge_unit_id, Episode, EpisodeFilter, EpisodeGraphIndex, EpisodeVectorIndex,
    KnowledgeStore, KnowledgeUnit, Provenance, StorageError,
};

/// Counts from a distillation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistillationOutcome {
    /// Undistilled episodes eligible for this run
    pub episodes_considered: usize,
    /// Graph entries skipped because their vector entry is missing
    pub orphans_skipped: usize,
    /// Whether the pool was left alone because it was below the buffer
    pub below_buffer: bool,
    /// Knowledge units indexed and committed
    pub units_written: usize,
    /// Staged units from an earlier run, published now
    pub recovered: usize,
    /// Clusters another run had already committed
    pub noops: usize,
    /// Clusters that failed and stay undistilled
    pub failures: usize,
    /// Whether every failure was retryable
    pub retryable: bool,
    /// Last failure message
    pub last_error: Option<String>,
}

impl DistillationOutcome {
    fn record_failure(&mut self, error: &LifecycleError) {
        self.retryable = if self.failures == 0 {
            error.is_retryable()
        } else {
            self.retryable && error.is_retryable()
        };
        self.failures += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Drives Tier-3 to Tier-4 migration.
pub struct DistillationEngine {
    vector: Arc<dyn EpisodeVectorIndex>,
    graph: Arc<dyn EpisodeGraphIndex>,
    knowledge: Arc<dyn KnowledgeStore>,
    synthesizer: KnowledgeSynthesizer,
    clusterer: EpisodeClusterer,
    bus: CognitiveEventBus,
    clock: Arc<dyn Clock>,
    buffer_min: usize,
    tier: Mutex<()>,
}

impl DistillationEngine {
    /// Create an engine. Unforced runs wait for `buffer_min` undistilled
    /// episodes in scope.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vector: Arc<dyn EpisodeVectorIndex>,
        graph: Arc<dyn EpisodeGraphIndex>,
        knowledge: Arc<dyn KnowledgeStore>,
        synthesizer: KnowledgeSynthesizer,
        clusterer: EpisodeClusterer,
        bus: CognitiveEventBus,
        clock: Arc<dyn Clock>,
        buffer_min: usize,
    ) -> Self {
        Self {
            vector,
            graph,
            knowledge,
            synthesizer,
            clusterer,
            bus,
            clock,
            buffer_min,
            tier: Mutex::new(()),
        }
    }

    /// Distill the undistilled episodes in `scope`.
    ///
    /// # Errors
    /// Returns `LifecycleError` if the pool cannot be read or clustering
    /// breaks its contract. Cluster failures are counted in the outcome.
    #[tracing::instrument(skip(self))]
    pub async fn distill(
        &self,
        scope: &RunScope,
        force: bool,
    ) -> Result<DistillationOutcome, LifecycleError> {
        let _guard = self.tier.lock().await;

        let mut outcome = DistillationOutcome::default();
        self.settle_staged(&mut outcome).await?;
        let pool = self.pool(scope, &mut outcome).await?;
        outcome.episodes_considered = pool.len();
        if pool.is_empty() {
            return Ok(outcome);
        }
        if !force && pool.len() < self.buffer_min {
            tracing::debug!(
                episodes = pool.len(),
                buffer_min = self.buffer_min,
                "below distillation buffer"
            );
            outcome.below_buffer = true;
            return Ok(outcome);
        }

        let clusters = self.clusterer.cluster(&pool)?;
        for cluster in clusters {
            let members: Vec<Episode> = cluster.members.iter().map(|&i| pool[i].clone()).collect();
            match self.write_unit(&members).await {
                Ok(true) => outcome.units_written += 1,
                Ok(false) => outcome.noops += 1,
                Err(error) => {
                    tracing::warn!(error = %error, episodes = members.len(), "knowledge write failed");
                    outcome.record_failure(&error);
                }
            }
        }

        if outcome.units_written > 0 || outcome.failures > 0 {
            tracing::info!(
                units = outcome.units_written,
                failures = outcome.failures,
                "distillation run finished"
            );
        }
        Ok(outcome)
    }

    /// Publish staged units whose episodes already point at them and drop
    /// the rest. Runs under the tier lock, so no unit here is in flight.
    async fn settle_staged(&self, outcome: &mut DistillationOutcome) -> Result<(), LifecycleError> {
        for unit in self.knowledge.staged().await? {
            let settled = match self.distilled_as(&unit.source_episode_ids, &unit.id).await {
                Ok(true) => self.knowledge.publish(&unit.id).await,
                Ok(false) => {
                    self.discard_unit(&unit.id).await;
                    continue;
                }
                Err(error) => Err(error),
            };
            match settled {
                Ok(()) => {
                    tracing::info!(unit_id = %unit.id, "published staged knowledge unit");
                    outcome.recovered += 1;
                    let count = unit.source_episode_ids.len();
                    self.announce(
                        &unit.id,
                        count,
                        format!("{count} episodes were already marked with this unit"),
                    );
                }
                Err(error) => {
                    tracing::warn!(unit_id = %unit.id, error = %error, "staged unit still unpublished");
                    outcome.record_failure(&LifecycleError::from(error));
                }
            }
        }
        Ok(())
    }

    async fn pool(
        &self,
        scope: &RunScope,
        outcome: &mut DistillationOutcome,
    ) -> Result<Vec<Episode>, LifecycleError> {
        let filter = match scope {
            RunScope::Session(session_id) => EpisodeFilter::all().session(session_id.as_str()),
            RunScope::All => EpisodeFilter::all(),
        }
        .undistilled();

        let mut pool = Vec::new();
        for episode in self.graph.filter(&filter).await? {
            if self.vector.exists(&episode.id).await? {
                pool.push(episode);
            } else {
                tracing::debug!(episode_id = %episode.id, "skipping episode without vector entry");
                outcome.orphans_skipped += 1;
            }
        }
        Ok(pool)
    }

    /// Returns `Ok(false)` when the cluster was already committed.
    async fn write_unit(&self, members: &[Episode]) -> Result<bool, LifecycleError> {
        assert!(!members.is_empty(), "cluster must have members");

        let episode_ids: Vec<String> = members.iter().map(|e| e.id.clone()).collect();
        let id = knowledge_unit_id(&episode_ids);

        let draft = self.synthesizer.synthesize_knowledge(members).await?;
        let provenance = Provenance {
            session_ids: members.iter().map(|e| e.session_id.clone()).collect(),
            fact_ids: members
                .iter()
                .flat_map(|e| e.source_fact_ids.iter().cloned())
                .collect::<BTreeSet<_>>(),
        };
        let unit = KnowledgeUnit {
            id: id.clone(),
            source_episode_ids: episode_ids.clone(),
            content: draft.content,
            provenance,
            created_at: self.clock.now(),
        };

        if !self.knowledge.stage(unit).await? {
            tracing::debug!(unit_id = %id, "knowledge unit already staged");
        }

        match self.graph.mark_distilled(&episode_ids, &id).await {
            Ok(()) => {}
            Err(StorageError::Conflict { .. }) => {
                tracing::debug!(unit_id = %id, "episodes already distilled");
                if self.distilled_as(&episode_ids, &id).await? {
                    self.knowledge.publish(&id).await?;
                } else {
                    self.discard_unit(&id).await;
                }
                return Ok(false);
            }
            Err(error) => {
                self.discard_unit(&id).await;
                return Err(error.into());
            }
        }

        self.knowledge.publish(&id).await?;
        self.announce(&id, members.len(), draft.justification);
        Ok(true)
    }

    /// Whether every episode already points at `unit_id`.
    async fn distilled_as(&self, episode_ids: &[String], unit_id: &str) -> Result<bool, StorageError> {
        for episode_id in episode_ids {
            let episode = self.graph.get(episode_id).await?;
            if episode.and_then(|e| e.knowledge_unit_id).as_deref() != Some(unit_id) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn discard_unit(&self, id: &str) {
        if let Err(error) = self.knowledge.discard_staged(id).await {
            tracing::warn!(unit_id = %id, error = %error, "staged knowledge unit left behind");
        }
    }

    fn announce(&self, unit_id: &str, episode_count: usize, justification: String) {
        self.bus.publish(CognitiveEvent::new(
            Component::Distillation,
            unit_id.to_string(),
            Decision::Distill {
                unit_id: unit_id.to_string(),
                episode_count,
            },
            justification,
            self.clock.now(),
        ));
    }
}
