//! `SimClock` - Simulated Time
//!
//! `TigerStyle`: Deterministic, controllable time for simulation.
//! Time never moves on its own; tests and backoff sleeps advance it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Notify;

use crate::constants::DST_TIME_ADVANCE_MS_MAX;

/// A simulated clock for deterministic testing.
///
/// `TigerStyle`:
/// - Time only moves forward
/// - All time operations are explicit
/// - Clones share the same timeline
#[derive(Debug, Clone)]
pub struct SimClock {
    /// Current time in milliseconds since epoch
    current_ms: Arc<AtomicU64>,
    /// Woken whenever time advances
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a new clock starting at the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::at_ms(0)
    }

    /// Create a clock starting at the given millisecond timestamp.
    #[must_use]
    pub fn at_ms(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(start_ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a clock starting at the given `DateTime`.
    ///
    /// # Panics
    /// Panics if `dt` is before the Unix epoch.
    #[must_use]
    pub fn at_datetime(dt: DateTime<Utc>) -> Self {
        let ms = dt.timestamp_millis();
        assert!(ms >= 0, "simulated time cannot start before the epoch");
        Self::at_ms(ms.unsigned_abs())
    }

    /// Current time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }

    /// Current time as `DateTime<Utc>`.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let ms = i64::try_from(self.now_ms()).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Advance time by the given milliseconds, returning the new time.
    ///
    /// # Panics
    /// Panics if `ms` exceeds `DST_TIME_ADVANCE_MS_MAX`.
    pub fn advance_ms(&self, ms: u64) -> u64 {
        assert!(
            ms <= DST_TIME_ADVANCE_MS_MAX,
            "advance_ms({ms}) exceeds max ({DST_TIME_ADVANCE_MS_MAX})"
        );

        let old_time = self.current_ms.fetch_add(ms, Ordering::SeqCst);
        let new_time = old_time.saturating_add(ms);
        self.notify.notify_waiters();

        assert!(new_time >= old_time, "time must not go backwards");
        new_time
    }

    /// Advance time by a chrono `Duration`.
    ///
    /// # Panics
    /// Panics if `duration` is negative.
    pub fn advance(&self, duration: Duration) -> u64 {
        let ms = duration.num_milliseconds();
        assert!(ms >= 0, "cannot go back in time");
        self.advance_ms(ms.unsigned_abs())
    }

    /// Set time to an absolute value.
    ///
    /// # Panics
    /// Panics if the new time is less than the current time.
    pub fn set_ms(&self, ms: u64) {
        let current = self.now_ms();
        assert!(ms >= current, "cannot set time backwards: {ms} < {current}");

        self.current_ms.store(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait until another task advances time by `duration_ms`.
    pub async fn sleep_ms(&self, duration_ms: u64) {
        let target_ms = self.now_ms().saturating_add(duration_ms);
        while self.now_ms() < target_ms {
            let notified = self.notify.notified();
            if self.now_ms() >= target_ms {
                break;
            }
            notified.await;
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}
