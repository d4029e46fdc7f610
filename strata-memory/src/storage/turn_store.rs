//! Tier 1 - Turn store
//!
//! `TigerStyle`: Append-only per-session logs with a forward-only processed
//! watermark. The watermark is the single source of truth for which turns
//! the promotion engine has handled; the `processed` flag on each turn is
//! derived from it.
//!
//! Before writing facts for a window, a run claims it. Only the claim holder
//! writes, so two runs extracting the same window never both persist facts.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{StorageError, StorageResult};
use super::records::{turn_id, NewTurn, Turn};
use crate::dst::FaultInjector;

/// One run's exclusive right to write the window after `watermark`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClaim {
    /// Run holding the claim
    pub owner: String,
    /// Watermark the window starts after
    pub watermark: u64,
    /// When other runs may take the window over
    pub expires_at: DateTime<Utc>,
}

/// Tier-1 store: ephemeral turns with TTL and a processed watermark.
#[async_trait]
pub trait TurnStore: Send + Sync + Debug {
    /// Append a turn, assigning its id and sequence number.
    async fn append(&self, turn: NewTurn) -> StorageResult<Turn>;

    /// Up to `limit` unprocessed turns of a session, in arrival order.
    async fn read_unprocessed(&self, session_id: &str, limit: usize) -> StorageResult<Vec<Turn>>;

    /// Sequence number of the last processed turn (0 if none).
    async fn watermark(&self, session_id: &str) -> StorageResult<u64>;

    /// Move the watermark from `expected` to `new`, dropping any claim.
    ///
    /// Returns `Ok(false)` without writing if the watermark is no longer
    /// `expected`, i.e. another run already handled the window.
    async fn advance_watermark(
        &self,
        session_id: &str,
        expected: u64,
        new: u64,
    ) -> StorageResult<bool>;

    /// Claim the window after `claim.watermark`.
    ///
    /// Returns `Ok(false)` if the watermark has already moved, or another
    /// owner holds an unexpired claim on it at `now`. The same owner claiming
    /// again renews its claim.
    async fn claim_window(
        &self,
        session_id: &str,
        claim: &WindowClaim,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Drop `owner`'s claim on a session. Not holding one is not an error.
    async fn release_window(&self, session_id: &str, owner: &str) -> StorageResult<()>;

    /// Sessions holding unprocessed turns, oldest backlog first.
    async fn sessions_with_backlog(&self) -> StorageResult<Vec<String>>;

    /// Unprocessed turns in one session, or in all sessions.
    async fn backlog_count(&self, session_id: Option<&str>) -> StorageResult<usize>;

    /// Drop turns spoken before `cutoff`. Returns how many were dropped.
    async fn expire_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;
}

// =============================================================================
// SimTurnStore
// =============================================================================

#[derive(Debug, Default)]
struct SessionLog {
    turns: Vec<Turn>,
    watermark: u64,
    next_sequence: u64,
    claim: Option<WindowClaim>,
}

impl SessionLog {
    fn unprocessed(&self) -> impl Iterator<Item = &Turn> {
        let watermark = self.watermark;
        self.turns.iter().filter(move |t| t.sequence > watermark)
    }
}

/// In-memory turn store with fault injection.
#[derive(Debug, Clone)]
pub struct SimTurnStore {
    sessions: Arc<RwLock<HashMap<String, SessionLog>>>,
    fault_injector: Arc<FaultInjector>,
}

impl SimTurnStore {
    /// Create a store sharing the given fault injector.
    #[must_use]
    pub fn new(fault_injector: Arc<FaultInjector>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
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

    /// Total turns held, processed or not (for tests).
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap()
            .values()
            .map(|log| log.turns.len())
            .sum()
    }
}

#[async_trait]
impl TurnStore for SimTurnStore {
    #[tracing::instrument(skip(self, turn), fields(session_id = %turn.session_id))]
    async fn append(&self, turn: NewTurn) -> StorageResult<Turn> {
        self.maybe_inject_fault("turn_append")?;

        let mut sessions = self.sessions.write().unwrap();
        let log = sessions.entry(turn.session_id.clone()).or_default();
        log.next_sequence += 1;

        let stored = Turn {
            id: turn_id(&turn.session_id, log.next_sequence),
            session_id: turn.session_id,
            role: turn.role,
            text: turn.text,
            timestamp: turn.timestamp,
            sequence: log.next_sequence,
            processed: false,
        };
        log.turns.push(stored.clone());

        debug_assert!(stored.sequence > log.watermark, "new turn must be unprocessed");
        Ok(stored)
    }

    async fn read_unprocessed(&self, session_id: &str, limit: usize) -> StorageResult<Vec<Turn>> {
        self.maybe_inject_fault("turn_read")?;

        let sessions = self.sessions.read().unwrap();
        Ok(sessions
            .get(session_id)
            .map(|log| log.unprocessed().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn watermark(&self, session_id: &str) -> StorageResult<u64> {
        self.maybe_inject_fault("turn_read")?;

        let sessions = self.sessions.read().unwrap();
        Ok(sessions.get(session_id).map_or(0, |log| log.watermark))
    }

    #[tracing::instrument(skip(self))]
    async fn advance_watermark(
        &self,
        session_id: &str,
        expected: u64,
        new: u64,
    ) -> StorageResult<bool> {
        self.maybe_inject_fault("turn_watermark_advance")?;

        if new <= expected {
            return Err(StorageError::validation(format!(
                "watermark must move forward: {expected} -> {new}"
            )));
        }

        let mut sessions = self.sessions.write().unwrap();
        let log = sessions
            .get_mut(session_id)
            .ok_or_else(|| StorageError::not_found(session_id))?;

        if log.watermark != expected {
            return Ok(false);
        }
        if new > log.next_sequence {
            return Err(StorageError::validation(format!(
                "watermark {new} beyond last sequence {}",
                log.next_sequence
            )));
        }

        log.watermark = new;
        log.claim = None;
        for turn in log.turns.iter_mut().filter(|t| t.sequence <= new) {
            turn.processed = true;
        }
        Ok(true)
    }

    #[tracing::instrument(skip(self, claim), fields(owner = %claim.owner))]
    async fn claim_window(
        &self,
        session_id: &str,
        claim: &WindowClaim,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.maybe_inject_fault("turn_claim")?;

        let mut sessions = self.sessions.write().unwrap();
        let log = sessions
            .get_mut(session_id)
            .ok_or_else(|| StorageError::not_found(session_id))?;

        if log.watermark != claim.watermark {
            return Ok(false);
        }
        let held_by_other = log.claim.as_ref().is_some_and(|held| {
            held.owner != claim.owner && held.watermark == log.watermark && held.expires_at > now
        });
        if held_by_other {
            return Ok(false);
        }
        log.claim = Some(claim.clone());
        Ok(true)
    }

    async fn release_window(&self, session_id: &str, owner: &str) -> StorageResult<()> {
        self.maybe_inject_fault("turn_claim")?;

        let mut sessions = self.sessions.write().unwrap();
        if let Some(log) = sessions.get_mut(session_id) {
            if log.claim.as_ref().is_some_and(|held| held.owner == owner) {
                log.claim = None;
            }
        }
        Ok(())
    }

    async fn sessions_with_backlog(&self) -> StorageResult<Vec<String>> {
        self.maybe_inject_fault("turn_read")?;

        let sessions = self.sessions.read().unwrap();
        let mut pending: Vec<(DateTime<Utc>, &String)> = sessions
            .iter()
            .filter_map(|(id, log)| log.unprocessed().map(|t| t.timestamp).min().map(|ts| (ts, id)))
            .collect();
        pending.sort();
        Ok(pending.into_iter().map(|(_, id)| id.clone()).collect())
    }

    async fn backlog_count(&self, session_id: Option<&str>) -> StorageResult<usize> {
        self.maybe_inject_fault("turn_read")?;

        let sessions = self.sessions.read().unwrap();
        Ok(match session_id {
            Some(id) => sessions.get(id).map_or(0, |log| log.unprocessed().count()),
            None => sessions.values().map(|log| log.unprocessed().count()).sum(),
        })
    }

    async fn expire_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        self.maybe_inject_fault("turn_expire")?;

        let mut sessions = self.sessions.write().unwrap();
        let mut expired = 0;
        for log in sessions.values_mut() {
            let before = log.turns.len();
            log.turns.retain(|t| t.timestamp >= cutoff);
            expired += before - log.turns.len();
        }
        Ok(expired)
    }
}
