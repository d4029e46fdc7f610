//! SignificanceScorer - pure promotion scoring
//!
//! `TigerStyle`: No I/O, no clock, no state beyond configuration.
//!
//! ```text
//! score = certainty * impact * decay(age)
//! decay(age) = max(0.5 ^ (age / half_life), f64::MIN_POSITIVE)
//! ```
//!
//! `decay` is non-increasing in age and stays in (0, 1], so for positive
//! certainty and impact the score stays in (0, certainty * impact].

use chrono::Duration;

use super::config::DecayConfig;
use crate::constants::{SCORE_MAX, SCORE_MIN};

/// Errors from scoring. Inputs are never clamped silently.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    /// Certainty or impact outside [0, 1], or NaN
    #[error("{name} {value} outside [0, 1]")]
    OutOfRange {
        /// Which input
        name: &'static str,
        /// Value given
        value: f64,
    },

    /// Age below zero
    #[error("negative age: {age_ms}ms")]
    NegativeAge {
        /// Age given, in milliseconds
        age_ms: i64,
    },
}

/// Computes significance scores and applies the promotion threshold.
#[derive(Debug, Clone, Copy)]
pub struct SignificanceScorer {
    config: DecayConfig,
}

impl SignificanceScorer {
    /// Create a scorer.
    ///
    /// # Panics
    /// Panics if the half-life is zero or the threshold is outside [0, 1].
    #[must_use]
    pub fn new(config: DecayConfig) -> Self {
        assert!(!config.half_life.is_zero(), "half_life must be positive");
        assert!(
            (SCORE_MIN..=SCORE_MAX).contains(&config.min_score),
            "min_score must be in [0, 1]"
        );
        Self { config }
    }

    /// Score a candidate of the given age.
    ///
    /// # Errors
    /// Returns `ScoreError` for out-of-range certainty/impact or negative age.
    pub fn score(&self, certainty: f64, impact: f64, age: Duration) -> Result<f64, ScoreError> {
        check_unit("certainty", certainty)?;
        check_unit("impact", impact)?;
        if age < Duration::zero() {
            return Err(ScoreError::NegativeAge {
                age_ms: age.num_milliseconds(),
            });
        }

        let base = certainty * impact;
        let mut score = base * self.decay(age);
        if base > 0.0 && score == 0.0 {
            // Product underflowed below the smallest normal; keep it positive.
            score = f64::from_bits(1);
        }

        debug_assert!(score >= 0.0 && score <= base, "score outside [0, base]");
        Ok(score)
    }

    /// Recency factor in (0, 1].
    #[must_use]
    pub fn decay(&self, age: Duration) -> f64 {
        let age_ms = age.num_milliseconds().max(0);
        #[allow(clippy::cast_precision_loss)]
        let halvings = age_ms as f64 / self.config.half_life.as_millis() as f64;
        0.5_f64.powf(halvings).max(f64::MIN_POSITIVE)
    }

    /// Whether `score` meets the threshold. Inclusive.
    #[must_use]
    pub fn promotes(&self, score: f64) -> bool {
        score >= self.config.min_score
    }

    /// Threshold in force.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.config.min_score
    }
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ScoreError> {
    if (SCORE_MIN..=SCORE_MAX).contains(&value) {
        Ok(())
    } else {
        Err(ScoreError::OutOfRange { name, value })
    }
}
