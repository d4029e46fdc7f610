//! Per-session advisory locks.
//!
//! At most one run of a given engine touches a session's backlog at a time.
//! Different sessions proceed in parallel. A session's entry lives only while
//! a run holds it or waits for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lazily created async mutex per session id.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive ownership of one session. Dropping it releases the session and
/// removes its entry once nobody else holds or awaits it.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a SessionLocks,
    session_id: String,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // Release first so our own guard no longer counts as a holder.
        drop(self.guard.take());

        let mut locks = self.locks.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}

impl SessionLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `session_id`.
    pub async fn lock(&self, session_id: &str) -> SessionGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        SessionGuard {
            guard: Some(lock.lock_owned().await),
            locks: self,
            session_id: session_id.to_string(),
        }
    }

    /// Whether a run currently holds `session_id`.
    #[must_use]
    pub fn is_locked(&self, session_id: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(session_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Sessions with an entry in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no session has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
