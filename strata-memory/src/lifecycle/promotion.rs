//! PromotionEngine - Tier 1 -> Tier 2
//!
//! `TigerStyle`: The processed watermark is the single source of truth.
//!
//! Per session, per window:
//!
//! ```text
//! IDLE ─► EXTRACTING ─► SCORING ─► WRITING ─► IDLE
//!            │                        │
//!            └─ unavailable: defer    ├─ claim window (lost: another run writes it)
//!                                     ├─ insert facts with score >= min_score
//!                                     ├─ CAS watermark (expected -> last seq)
//!                                     └─ one PROMOTE/REJECT event per candidate
//! ```
//!
//! Fact ids are derived from their source turns and content, so a window
//! retried after a failed watermark write re-inserts the same ids as no-ops.
//! The claim keeps a second engine, whose extraction may phrase the same
//! window differently, from persisting facts of its own.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::error::LifecycleError;
use super::extractor::{CandidateFact, ExtractionError, FactExtractor};
use super::locks::SessionLocks;
use super::scorer::SignificanceScorer;
use crate::clock::Clock;
use crate::constants::{
    DRAIN_PASSES_COUNT_MAX, PROMOTION_CLAIM_TTL_MS, PROMOTION_WINDOW_TURNS_COUNT_MAX,
};
use crate::events::{CognitiveEvent, CognitiveEventBus, Component, Decision};
use crate::storage::{fact_id, Fact, FactStore, StorageError, TurnStore, WindowClaim};

static ENGINE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Where a session's promotion run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromotionPhase {
    /// No run in progress
    #[default]
    Idle,
    /// Waiting on the reasoning service
    Extracting,
    /// Scoring candidates
    Scoring,
    /// Persisting facts and advancing the watermark
    Writing,
}

/// Counts from a promotion run over one or more sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionOutcome {
    /// Sessions visited
    pub sessions: usize,
    /// Windows whose watermark this run advanced
    pub windows: usize,
    /// Turns marked processed by this run
    pub turns_processed: usize,
    /// Valid candidates scored
    pub candidates: usize,
    /// Candidates persisted as facts
    pub promoted: usize,
    /// Candidates below the threshold
    pub rejected: usize,
    /// Malformed extraction items dropped
    pub discarded: usize,
    /// Windows another run had already handled
    pub superseded: usize,
    /// Sessions set aside for the next recovery sweep
    pub deferred: Vec<String>,
    /// Sessions that failed
    pub failures: usize,
    /// Last failure message
    pub last_error: Option<String>,
}

impl PromotionOutcome {
    fn absorb(&mut self, other: Self) {
        self.sessions += other.sessions;
        self.windows += other.windows;
        self.turns_processed += other.turns_processed;
        self.candidates += other.candidates;
        self.promoted += other.promoted;
        self.rejected += other.rejected;
        self.discarded += other.discarded;
        self.superseded += other.superseded;
        self.deferred.extend(other.deferred);
        self.failures += other.failures;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
    }

    /// Whether the run changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.windows == 0 && self.failures == 0
    }
}

struct ScoredCandidate {
    candidate: CandidateFact,
    fact_id: String,
    score: f64,
    promoted: bool,
}

impl ScoredCandidate {
    fn to_fact(&self, session_id: &str, now: DateTime<Utc>) -> Fact {
        Fact {
            id: self.fact_id.clone(),
            session_id: session_id.to_string(),
            source_turn_ids: self.candidate.source_turn_ids.clone(),
            content: self.candidate.content.clone(),
            certainty: self.candidate.certainty,
            impact: self.candidate.impact,
            score: self.score,
            scored_at: now,
            justification: self.candidate.justification.clone(),
            observed_at: self.candidate.observed_at,
            consolidated: false,
            episode_id: None,
            created_at: now,
        }
    }
}

/// Drives Tier-1 to Tier-2 migration.
pub struct PromotionEngine {
    turns: Arc<dyn TurnStore>,
    facts: Arc<dyn FactStore>,
    extractor: FactExtractor,
    scorer: SignificanceScorer,
    bus: CognitiveEventBus,
    clock: Arc<dyn Clock>,
    window: usize,
    owner: String,
    locks: SessionLocks,
    phases: Mutex<HashMap<String, PromotionPhase>>,
    deferred: Mutex<BTreeSet<String>>,
}

impl PromotionEngine {
    /// Create an engine reading `window` turns per extraction call.
    ///
    /// # Panics
    /// Panics if `window` is 0 or above `PROMOTION_WINDOW_TURNS_COUNT_MAX`.
    #[must_use]
    pub fn new(
        turns: Arc<dyn TurnStore>,
        facts: Arc<dyn FactStore>,
        extractor: FactExtractor,
        scorer: SignificanceScorer,
        bus: CognitiveEventBus,
        clock: Arc<dyn Clock>,
        window: usize,
    ) -> Self {
        assert!(
            (1..=PROMOTION_WINDOW_TURNS_COUNT_MAX).contains(&window),
            "promotion window must be 1..={PROMOTION_WINDOW_TURNS_COUNT_MAX}"
        );
        Self {
            turns,
            facts,
            extractor,
            scorer,
            bus,
            clock,
            window,
            owner: format!("promotion-{}", ENGINE_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1),
            locks: SessionLocks::new(),
            phases: Mutex::new(HashMap::new()),
            deferred: Mutex::new(BTreeSet::new()),
        }
    }

    /// Current phase of a session.
    #[must_use]
    pub fn phase(&self, session_id: &str) -> PromotionPhase {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .copied()
            .unwrap_or_default()
    }

    /// Sessions whose last window was deferred.
    #[must_use]
    pub fn deferred_sessions(&self) -> Vec<String> {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn set_phase(&self, session_id: &str, phase: PromotionPhase) {
        let mut phases = self.phases.lock().unwrap_or_else(PoisonError::into_inner);
        if phase == PromotionPhase::Idle {
            phases.remove(session_id);
        } else {
            phases.insert(session_id.to_string(), phase);
        }
    }

    fn set_deferred(&self, session_id: &str, deferred: bool) {
        let mut set = self.deferred.lock().unwrap_or_else(PoisonError::into_inner);
        if deferred {
            set.insert(session_id.to_string());
        } else {
            set.remove(session_id);
        }
    }

    /// Promote every session with unprocessed turns, plus deferred ones.
    /// Sessions with the oldest backlog go first; a failing session does not
    /// stop the others.
    ///
    /// # Errors
    /// Returns `LifecycleError` only if the backlog cannot be listed.
    #[tracing::instrument(skip(self))]
    pub async fn promote_all(&self) -> Result<PromotionOutcome, LifecycleError> {
        let mut sessions = self.turns.sessions_with_backlog().await?;
        for deferred in self.deferred_sessions() {
            if !sessions.contains(&deferred) {
                sessions.push(deferred);
            }
        }

        let mut total = PromotionOutcome::default();
        for session_id in sessions {
            match self.promote_session(&session_id).await {
                Ok(outcome) => total.absorb(outcome),
                Err(error) => {
                    tracing::warn!(session_id = %session_id, error = %error, "promotion failed");
                    total.sessions += 1;
                    total.failures += 1;
                    if matches!(error, LifecycleError::Deferred { .. }) {
                        total.deferred.push(session_id.clone());
                    }
                    total.last_error = Some(error.to_string());
                }
            }
        }
        Ok(total)
    }

    /// Drain the unprocessed turns of one session, window by window.
    ///
    /// # Errors
    /// Returns `LifecycleError::Deferred` when extraction stays unavailable,
    /// or the storage error that stopped the run. Windows completed before
    /// the failure stay committed.
    #[tracing::instrument(skip(self))]
    pub async fn promote_session(&self, session_id: &str) -> Result<PromotionOutcome, LifecycleError> {
        let _guard = self.locks.lock(session_id).await;
        let result = self.drain_session(session_id).await;
        self.set_phase(session_id, PromotionPhase::Idle);
        result
    }

    async fn drain_session(&self, session_id: &str) -> Result<PromotionOutcome, LifecycleError> {
        let mut outcome = PromotionOutcome {
            sessions: 1,
            ..PromotionOutcome::default()
        };
        let mut window = self.window;

        for _ in 0..DRAIN_PASSES_COUNT_MAX {
            let watermark = self.turns.watermark(session_id).await?;
            let batch = self.turns.read_unprocessed(session_id, window).await?;
            let Some(last) = batch.last() else {
                self.set_deferred(session_id, false);
                return Ok(outcome);
            };
            let last_sequence = last.sequence;
            debug_assert!(
                batch.iter().all(|t| t.sequence > watermark),
                "unprocessed turn at or below watermark"
            );

            self.set_phase(session_id, PromotionPhase::Extracting);
            let extraction = match self.extractor.extract(session_id, &batch).await {
                Ok(extraction) => extraction,
                Err(ExtractionError::PromptTooLarge { bytes }) if window > 1 => {
                    window = (window / 2).max(1);
                    tracing::debug!(session_id, bytes, window, "shrinking promotion window");
                    continue;
                }
                Err(error) => {
                    self.set_deferred(session_id, true);
                    tracing::warn!(session_id, error = %error, "deferring promotion window");
                    return Err(LifecycleError::deferred(session_id, error.to_string()));
                }
            };

            self.set_phase(session_id, PromotionPhase::Scoring);
            let now = self.clock.now();
            let mut scored = Vec::with_capacity(extraction.candidates.len());
            for candidate in extraction.candidates {
                let age = (now - candidate.observed_at).max(chrono::Duration::zero());
                let score = self.scorer.score(candidate.certainty, candidate.impact, age)?;
                scored.push(ScoredCandidate {
                    fact_id: fact_id(session_id, &candidate.source_turn_ids, &candidate.content),
                    promoted: self.scorer.promotes(score),
                    score,
                    candidate,
                });
            }

            self.set_phase(session_id, PromotionPhase::Writing);
            if !self.claim(session_id, watermark, now).await? {
                outcome.superseded += 1;
                if self.turns.watermark(session_id).await? == watermark {
                    tracing::debug!(session_id, watermark, "window claimed by another run");
                    return Ok(outcome);
                }
                continue;
            }

            let advanced = match self.write_window(session_id, &scored, now).await {
                Ok(()) => {
                    self.turns
                        .advance_watermark(session_id, watermark, last_sequence)
                        .await
                }
                Err(error) => Err(error),
            };
            let advanced = match advanced {
                Ok(advanced) => advanced,
                Err(error) => {
                    self.release(session_id).await;
                    return Err(error.into());
                }
            };
            if !advanced {
                self.release(session_id).await;
                tracing::debug!(session_id, watermark, "window already handled by another run");
                outcome.superseded += 1;
                continue;
            }

            outcome.windows += 1;
            outcome.turns_processed += batch.len();
            outcome.discarded += extraction.discarded;
            for item in scored {
                outcome.candidates += 1;
                if item.promoted {
                    outcome.promoted += 1;
                } else {
                    outcome.rejected += 1;
                }
                self.bus.publish(self.to_event(item, now));
            }
            window = self.window;
        }

        Err(LifecycleError::deferred(
            session_id,
            format!("backlog not drained after {DRAIN_PASSES_COUNT_MAX} windows"),
        ))
    }

    async fn claim(
        &self,
        session_id: &str,
        watermark: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        #[allow(clippy::cast_possible_wrap)]
        let ttl = chrono::Duration::milliseconds(PROMOTION_CLAIM_TTL_MS as i64);
        let claim = WindowClaim {
            owner: self.owner.clone(),
            watermark,
            expires_at: now + ttl,
        };
        self.turns.claim_window(session_id, &claim, now).await
    }

    async fn release(&self, session_id: &str) {
        if let Err(error) = self.turns.release_window(session_id, &self.owner).await {
            tracing::warn!(session_id, error = %error, "window claim left to expire");
        }
    }

    async fn write_window(
        &self,
        session_id: &str,
        scored: &[ScoredCandidate],
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        for item in scored.iter().filter(|s| s.promoted) {
            if !self.facts.insert(item.to_fact(session_id, now)).await? {
                tracing::debug!(fact_id = %item.fact_id, "fact already promoted");
            }
        }
        Ok(())
    }

    fn to_event(&self, item: ScoredCandidate, now: DateTime<Utc>) -> CognitiveEvent {
        let threshold = self.scorer.threshold();
        let (certainty, impact, score) = (item.candidate.certainty, item.candidate.impact, item.score);
        let (decision, justification) = if item.promoted {
            (
                Decision::Promote {
                    score,
                    threshold,
                    certainty,
                    impact,
                },
                item.candidate.justification,
            )
        } else {
            (
                Decision::Reject {
                    score,
                    threshold,
                    certainty,
                    impact,
                },
                format!(
                    "score {score:.3} below {threshold:.3}; {}",
                    item.candidate.justification
                ),
            )
        };
        CognitiveEvent::new(Component::Promotion, item.fact_id, decision, justification, now)
    }
}
