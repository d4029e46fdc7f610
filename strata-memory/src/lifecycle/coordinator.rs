//! TriggerCoordinator - when the engines run
//!
//! `TigerStyle`: No wall-clock scheduling. Three trigger sources, one set
//! of engine entry points:
//!
//! ```text
//! run_recovery_sweep()            ─► promote all ─► consolidate all ─► distill all
//! on_backlog_threshold_crossed(t) ─► engine of tier t, if backlog >= watermark
//! on_session_concluded(s)         ─► promote s ─► consolidate s ─► distill s (forced)
//! ```
//!
//! Threshold and boundary triggers wait until the first recovery sweep has
//! finished, so a restart drains old backlog before new input migrates.
//! Engines never learn which trigger invoked them; a run that loses a race
//! for a session finds the work already done and no-ops.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::clusterer::EpisodeClusterer;
use super::config::LifecycleConfig;
use super::consolidation::{ConsolidationEngine, ConsolidationOutcome};
use super::distillation::{DistillationEngine, DistillationOutcome};
use super::error::LifecycleError;
use super::extractor::FactExtractor;
use super::promotion::{PromotionEngine, PromotionOutcome};
use super::scorer::SignificanceScorer;
use super::synthesizer::KnowledgeSynthesizer;
use super::RunScope;
use crate::clock::Clock;
use crate::embedding::EmbeddingProvider;
use crate::events::CognitiveEventBus;
use crate::llm::LLMProvider;
use crate::storage::{EpisodeGraphIndex, EpisodeVectorIndex, FactStore, KnowledgeStore, TurnStore};

// =============================================================================
// Tiers and reports
// =============================================================================

/// A tier whose backlog feeds one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Unprocessed turns, drained by promotion
    Turns,
    /// Unconsolidated facts, drained by consolidation
    Facts,
    /// Undistilled episodes, drained by distillation
    Episodes,
}

impl Tier {
    /// Every tier with a backlog, in migration order.
    pub const ALL: [Tier; 3] = [Tier::Turns, Tier::Facts, Tier::Episodes];

    /// String representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Turns => "turns",
            Self::Facts => "facts",
            Self::Episodes => "episodes",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Turns => 0,
            Self::Facts => 1,
            Self::Episodes => 2,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What each engine did during one trigger. `None` means the engine was not
/// run or its run failed before producing counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Promotion counts
    pub promotion: Option<PromotionOutcome>,
    /// Consolidation counts
    pub consolidation: Option<ConsolidationOutcome>,
    /// Distillation counts
    pub distillation: Option<DistillationOutcome>,
}

/// Result of a threshold trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdOutcome {
    /// The backlog was below the watermark
    NotTriggered {
        /// Current backlog
        backlog: usize,
        /// Configured watermark
        watermark: usize,
    },
    /// The tier's engine ran
    Ran(RunReport),
}

// =============================================================================
// Health
// =============================================================================

/// How the last run of an engine ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every unit committed or no-oped
    Succeeded,
    /// Some units failed; the next trigger retries them
    Retryable,
    /// The run hit a contract violation
    Failed,
}

#[derive(Debug, Clone, Default)]
struct TierRecord {
    last_run_at: Option<DateTime<Utc>>,
    last_status: Option<RunStatus>,
    last_error: Option<String>,
    consecutive_failures: u32,
    runs_total: u64,
}

/// Per-tier view in a health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierHealth {
    /// Tier
    pub tier: Tier,
    /// Current backlog, `None` if the store could not be read
    pub backlog: Option<usize>,
    /// Configured watermark
    pub watermark: usize,
    /// When the tier's engine last finished a run
    pub last_run_at: Option<DateTime<Utc>>,
    /// How that run ended
    pub last_status: Option<RunStatus>,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// Failed runs since the last success
    pub consecutive_failures: u32,
    /// Runs finished since start
    pub runs_total: u64,
}

/// Snapshot of the lifecycle engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleHealth {
    /// Whether the first recovery sweep has finished
    pub recovered: bool,
    /// Per-tier state, in migration order
    pub tiers: Vec<TierHealth>,
    /// Events accepted by the bus
    pub events_published: u64,
    /// Events dropped by the bus
    pub events_dropped: u64,
    /// Sessions waiting on the reasoning service
    pub deferred_sessions: Vec<String>,
}

impl LifecycleHealth {
    /// Health of one tier.
    #[must_use]
    pub fn tier(&self, tier: Tier) -> &TierHealth {
        &self.tiers[tier.index()]
    }
}

// =============================================================================
// TriggerCoordinator
// =============================================================================

/// The stores the lifecycle engine migrates between.
#[derive(Debug, Clone)]
pub struct LifecycleStores {
    /// Tier 1
    pub turns: Arc<dyn TurnStore>,
    /// Tier 2
    pub facts: Arc<dyn FactStore>,
    /// Tier 3 similarity side
    pub episode_vectors: Arc<dyn EpisodeVectorIndex>,
    /// Tier 3 graph side
    pub episode_graph: Arc<dyn EpisodeGraphIndex>,
    /// Tier 4
    pub knowledge: Arc<dyn KnowledgeStore>,
}

/// Owns the three engines and decides when they run.
pub struct TriggerCoordinator {
    stores: LifecycleStores,
    promotion: PromotionEngine,
    consolidation: ConsolidationEngine,
    distillation: DistillationEngine,
    config: LifecycleConfig,
    bus: CognitiveEventBus,
    clock: Arc<dyn Clock>,
    records: Mutex<[TierRecord; 3]>,
    recovered: watch::Sender<bool>,
}

impl TriggerCoordinator {
    /// Wire the engines over `stores`.
    ///
    /// # Errors
    /// Returns `LifecycleError::Config` if `config` does not validate.
    pub fn new(
        stores: LifecycleStores,
        llm: Arc<dyn LLMProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        bus: CognitiveEventBus,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;

        let promotion = PromotionEngine::new(
            Arc::clone(&stores.turns),
            Arc::clone(&stores.facts),
            FactExtractor::new(Arc::clone(&llm), config.retry, Arc::clone(&clock)),
            SignificanceScorer::new(config.decay),
            bus.clone(),
            Arc::clone(&clock),
            config.promotion_window,
        );
        let consolidation = ConsolidationEngine::new(
            Arc::clone(&stores.facts),
            Arc::clone(&stores.episode_vectors),
            Arc::clone(&stores.episode_graph),
            embedder,
            KnowledgeSynthesizer::new(Arc::clone(&llm), config.retry, Arc::clone(&clock)),
            EpisodeClusterer::new(config.consolidation_cluster),
            bus.clone(),
            Arc::clone(&clock),
            config.retry,
            config.consolidation_buffer_min,
        );
        let distillation = DistillationEngine::new(
            Arc::clone(&stores.episode_vectors),
            Arc::clone(&stores.episode_graph),
            Arc::clone(&stores.knowledge),
            KnowledgeSynthesizer::new(llm, config.retry, Arc::clone(&clock)),
            EpisodeClusterer::new(config.distillation_cluster),
            bus.clone(),
            Arc::clone(&clock),
            config.distillation_buffer_min,
        );

        let (recovered, _) = watch::channel(false);
        Ok(Self {
            stores,
            promotion,
            consolidation,
            distillation,
            config,
            bus,
            clock,
            records: Mutex::new(Default::default()),
            recovered,
        })
    }

    /// Whether the first recovery sweep has finished.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        *self.recovered.borrow()
    }

    /// The promotion engine, for direct per-session runs.
    #[must_use]
    pub fn promotion(&self) -> &PromotionEngine {
        &self.promotion
    }

    async fn wait_recovered(&self) {
        let mut recovered = self.recovered.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = recovered.wait_for(|done| *done).await;
    }

    /// Drain every tier's backlog in migration order, forcing past buffer
    /// minimums. A failing tier is recorded in health and does not stop the
    /// tiers after it.
    #[tracing::instrument(skip(self))]
    pub async fn run_recovery_sweep(&self) -> RunReport {
        tracing::info!("recovery sweep started");

        let report = RunReport {
            promotion: self.run_promotion(None).await,
            consolidation: self.run_consolidation(&RunScope::All, true).await,
            distillation: self.run_distillation(&RunScope::All, true).await,
        };

        self.recovered.send_replace(true);
        tracing::info!(
            promoted = report.promotion.as_ref().map_or(0, |o| o.promoted),
            episodes = report.consolidation.as_ref().map_or(0, |o| o.episodes_written),
            units = report.distillation.as_ref().map_or(0, |o| o.units_written),
            "recovery sweep finished"
        );
        report
    }

    /// Run the engine of `tier` if its backlog has reached the watermark.
    ///
    /// # Errors
    /// Returns `LifecycleError::Storage` if the backlog cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn on_backlog_threshold_crossed(
        &self,
        tier: Tier,
    ) -> Result<ThresholdOutcome, LifecycleError> {
        self.wait_recovered().await;

        let backlog = self.backlog(tier).await?;
        let watermark = self.watermark(tier);
        if backlog < watermark {
            tracing::debug!(%tier, backlog, watermark, "backlog below watermark");
            return Ok(ThresholdOutcome::NotTriggered { backlog, watermark });
        }

        let mut report = RunReport::default();
        match tier {
            Tier::Turns => report.promotion = self.run_promotion(None).await,
            Tier::Facts => {
                report.consolidation = self.run_consolidation(&RunScope::All, false).await;
            }
            Tier::Episodes => {
                report.distillation = self.run_distillation(&RunScope::All, false).await;
            }
        }
        Ok(ThresholdOutcome::Ran(report))
    }

    /// Migrate everything `session_id` left behind, regardless of buffer
    /// minimums.
    #[tracing::instrument(skip(self))]
    pub async fn on_session_concluded(&self, session_id: &str) -> RunReport {
        assert!(!session_id.is_empty(), "session_id must not be empty");
        self.wait_recovered().await;

        let scope = RunScope::Session(session_id.to_string());
        RunReport {
            promotion: self.run_promotion(Some(session_id)).await,
            consolidation: self.run_consolidation(&scope, true).await,
            distillation: self.run_distillation(&scope, true).await,
        }
    }

    /// Tiers whose backlog has reached the watermark.
    ///
    /// # Errors
    /// Returns `LifecycleError::Storage` if a backlog cannot be read.
    pub async fn crossed_watermarks(&self) -> Result<Vec<Tier>, LifecycleError> {
        let mut crossed = Vec::new();
        for tier in Tier::ALL {
            if self.backlog(tier).await? >= self.watermark(tier) {
                crossed.push(tier);
            }
        }
        Ok(crossed)
    }

    /// Drop turns older than the configured TTL.
    ///
    /// # Errors
    /// Returns `LifecycleError::Storage` if the store rejects the expiry.
    pub async fn expire_turns(&self) -> Result<usize, LifecycleError> {
        let ttl = chrono::Duration::from_std(self.config.turn_ttl)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let expired = self.stores.turns.expire_before(cutoff).await?;
        if expired > 0 {
            tracing::info!(expired, %cutoff, "expired turns");
        }
        Ok(expired)
    }

    /// Backlog depth, last runs and event counts.
    pub async fn health(&self) -> LifecycleHealth {
        let records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut tiers = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            let record = &records[tier.index()];
            tiers.push(TierHealth {
                tier,
                backlog: self.backlog(tier).await.ok(),
                watermark: self.watermark(tier),
                last_run_at: record.last_run_at,
                last_status: record.last_status,
                last_error: record.last_error.clone(),
                consecutive_failures: record.consecutive_failures,
                runs_total: record.runs_total,
            });
        }

        LifecycleHealth {
            recovered: self.is_recovered(),
            tiers,
            events_published: self.bus.published_count(),
            events_dropped: self.bus.dropped_count(),
            deferred_sessions: self.promotion.deferred_sessions(),
        }
    }

    async fn backlog(&self, tier: Tier) -> Result<usize, LifecycleError> {
        let backlog = match tier {
            Tier::Turns => self.stores.turns.backlog_count(None).await?,
            Tier::Facts => self.stores.facts.unconsolidated_count(None).await?,
            Tier::Episodes => self.stores.episode_graph.undistilled_count(None).await?,
        };
        Ok(backlog)
    }

    fn watermark(&self, tier: Tier) -> usize {
        let watermarks = &self.config.watermarks;
        match tier {
            Tier::Turns => watermarks.turns,
            Tier::Facts => watermarks.facts,
            Tier::Episodes => watermarks.episodes,
        }
    }

    // =========================================================================
    // Engine runs
    // =========================================================================

    async fn run_promotion(&self, session_id: Option<&str>) -> Option<PromotionOutcome> {
        let result = match session_id {
            Some(session_id) => self.promotion.promote_session(session_id).await,
            None => self.promotion.promote_all().await,
        };
        match result {
            Ok(outcome) => {
                let failed = outcome.failures;
                let error = (failed > 0).then(|| LifecycleError::Partial {
                    attempted: outcome.sessions,
                    failures: failed,
                    last: outcome.last_error.clone().unwrap_or_default(),
                    retryable: outcome.deferred.len() == failed,
                });
                self.record(Tier::Turns, error.as_ref());
                Some(outcome)
            }
            Err(error) => {
                self.record(Tier::Turns, Some(&error));
                None
            }
        }
    }

    async fn run_consolidation(
        &self,
        scope: &RunScope,
        force: bool,
    ) -> Option<ConsolidationOutcome> {
        match self.consolidation.consolidate(scope, force).await {
            Ok(outcome) => {
                let error = (outcome.failures > 0).then(|| LifecycleError::Partial {
                    attempted: outcome.episodes_written
                        + outcome.recovered
                        + outcome.noops
                        + outcome.failures,
                    failures: outcome.failures,
                    last: outcome.last_error.clone().unwrap_or_default(),
                    retryable: outcome.retryable,
                });
                self.record(Tier::Facts, error.as_ref());
                Some(outcome)
            }
            Err(error) => {
                self.record(Tier::Facts, Some(&error));
                None
            }
        }
    }

    async fn run_distillation(&self, scope: &RunScope, force: bool) -> Option<DistillationOutcome> {
        match self.distillation.distill(scope, force).await {
            Ok(outcome) => {
                let error = (outcome.failures > 0).then(|| LifecycleError::Partial {
                    attempted: outcome.units_written
                        + outcome.recovered
                        + outcome.noops
                        + outcome.failures,
                    failures: outcome.failures,
                    last: outcome.last_error.clone().unwrap_or_default(),
                    retryable: outcome.retryable,
                });
                self.record(Tier::Episodes, error.as_ref());
                Some(outcome)
            }
            Err(error) => {
                self.record(Tier::Episodes, Some(&error));
                None
            }
        }
    }

    fn record(&self, tier: Tier, error: Option<&LifecycleError>) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = &mut records[tier.index()];
        record.last_run_at = Some(self.clock.now());
        record.runs_total += 1;
        match error {
            None => {
                record.last_status = Some(RunStatus::Succeeded);
                record.consecutive_failures = 0;
            }
            Some(error) => {
                if error.is_retryable() {
                    tracing::warn!(%tier, error = %error, "engine run failed, will retry");
                    record.last_status = Some(RunStatus::Retryable);
                } else {
                    tracing::error!(%tier, error = %error, "engine run failed");
                    record.last_status = Some(RunStatus::Failed);
                }
                record.last_error = Some(error.to_string());
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            }
        }
    }
}

// =============================================================================
// Worker mode
// =============================================================================

/// A trigger queued for the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerRequest {
    /// Run another recovery sweep
    Recovery,
    /// A tier's backlog may have crossed its watermark
    Threshold(Tier),
    /// A session ended
    SessionConcluded(String),
}

/// Why a trigger could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    /// The queue is at capacity
    #[error("trigger queue full")]
    QueueFull,
    /// The worker has stopped
    #[error("trigger worker stopped")]
    Closed,
}

/// Non-blocking handle for firing triggers at a worker.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    sender: mpsc::Sender<TriggerRequest>,
}

impl TriggerHandle {
    /// Queue a trigger without waiting.
    ///
    /// # Errors
    /// Returns `TriggerError` if the queue is full or the worker stopped.
    pub fn enqueue(&self, request: TriggerRequest) -> Result<(), TriggerError> {
        self.sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TriggerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TriggerError::Closed,
        })
    }
}

impl TriggerCoordinator {
    /// Start a worker that runs the recovery sweep, then serves queued
    /// triggers concurrently. The worker stops once every handle is dropped
    /// and in-flight triggers finish.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn spawn_worker(self: &Arc<Self>, capacity: usize) -> (TriggerHandle, JoinHandle<()>) {
        assert!(capacity > 0, "trigger queue capacity must be positive");

        let (sender, mut receiver) = mpsc::channel(capacity);
        let coordinator = Arc::clone(self);
        let worker = tokio::spawn(async move {
            coordinator.run_recovery_sweep().await;

            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    request = receiver.recv() => {
                        let Some(request) = request else { break };
                        let coordinator = Arc::clone(&coordinator);
                        in_flight.spawn(async move { coordinator.serve(request).await });
                    }
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(error) = joined {
                            tracing::error!(error = %error, "trigger task panicked");
                        }
                    }
                }
            }
            while in_flight.join_next().await.is_some() {}
            tracing::debug!("trigger worker stopped");
        });

        (TriggerHandle { sender }, worker)
    }

    async fn serve(&self, request: TriggerRequest) {
        match request {
            TriggerRequest::Recovery => {
                self.run_recovery_sweep().await;
            }
            TriggerRequest::Threshold(tier) => {
                if let Err(error) = self.on_backlog_threshold_crossed(tier).await {
                    tracing::warn!(%tier, error = %error, "threshold trigger failed");
                }
            }
            TriggerRequest::SessionConcluded(session_id) => {
                self.on_session_concluded(&session_id).await;
            }
        }
    }
}
