//! Clock abstraction for the lifecycle engines.
//!
//! `TigerStyle`: Engines never read system time directly. Production wires
//! `SystemClock`; simulation wires `SimClock`, whose sleeps move simulated
//! time forward instead of waiting.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dst::SimClock;

/// Source of "now" and of backoff sleeps.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        SimClock::now(self)
    }

    async fn sleep(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.advance_ms(ms);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sim_clock_sleep_advances_time() {
        let clock = SimClock::at_ms(1_000);

        Clock::sleep(&clock, Duration::from_millis(250)).await;

        assert_eq!(clock.now_ms(), 1_250);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
