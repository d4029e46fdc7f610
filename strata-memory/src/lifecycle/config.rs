//! Lifecycle Configuration
//!
//! `TigerStyle`: Sensible defaults, builder pattern, explicit over implicit.
//!
//! Every tunable of the three engines and the coordinator lives here. The
//! decay curve, promotion threshold and clustering metric are configuration,
//! never hard-coded at the call site.

use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    BACKLOG_EPISODES_WATERMARK_COUNT_DEFAULT, BACKLOG_FACTS_WATERMARK_COUNT_DEFAULT,
    BACKLOG_TURNS_WATERMARK_COUNT_DEFAULT, CLUSTER_MEMBERS_COUNT_MAX,
    CLUSTER_SIMILARITY_THRESHOLD_DEFAULT, CLUSTER_TIME_WINDOW_MS_DEFAULT,
    CONSOLIDATION_BUFFER_FACTS_COUNT_DEFAULT, DISTILLATION_BUFFER_EPISODES_COUNT_DEFAULT,
    EVENT_BUS_CAPACITY_COUNT_DEFAULT, EVENT_BUS_CAPACITY_COUNT_MAX,
    PROMOTION_WINDOW_TURNS_COUNT_DEFAULT, PROMOTION_WINDOW_TURNS_COUNT_MAX,
    RETRY_ATTEMPTS_COUNT_DEFAULT, RETRY_ATTEMPTS_COUNT_MAX, RETRY_DELAY_MS_BASE,
    RETRY_DELAY_MS_MAX, SCORE_DECAY_HALF_LIFE_MS_DEFAULT, SCORE_DECAY_HALF_LIFE_MS_MIN,
    SCORE_MAX, SCORE_MIN, SCORE_PROMOTION_THRESHOLD_DEFAULT, TURN_TTL_MS_DEFAULT,
};

// =============================================================================
// Errors
// =============================================================================

/// Errors from configuration validation and loading.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A field holds an unusable value
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Field path, e.g. `decay.min_score`
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// An environment variable could not be parsed
    #[error("cannot parse {var}={value:?}: {message}")]
    Env {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// Parser message
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

// =============================================================================
// Nested configs
// =============================================================================

/// Significance decay and promotion threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayConfig {
    /// Age at which decay reaches one half.
    ///
    /// Default: 1 day
    pub half_life: Duration,

    /// Scores at or above this promote.
    ///
    /// Default: 0.5
    pub min_score: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life: Duration::from_millis(SCORE_DECAY_HALF_LIFE_MS_DEFAULT),
            min_score: SCORE_PROMOTION_THRESHOLD_DEFAULT,
        }
    }
}

/// Clustering metric parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterConfig {
    /// Minimum Jaccard similarity between an item and a cluster.
    ///
    /// Default: 0.2
    pub similarity_threshold: f64,

    /// Maximum gap between an item and the newest member of a cluster.
    ///
    /// Default: 6 hours
    pub time_window: Duration,

    /// Maximum members per cluster.
    ///
    /// Default: 64
    pub members_max: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: CLUSTER_SIMILARITY_THRESHOLD_DEFAULT,
            time_window: Duration::from_millis(CLUSTER_TIME_WINDOW_MS_DEFAULT),
            members_max: CLUSTER_MEMBERS_COUNT_MAX,
        }
    }
}

/// Bounded exponential backoff for reasoning-service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    ///
    /// Default: 3
    pub max_attempts: u32,

    /// Delay before the second attempt.
    ///
    /// Default: 100ms
    pub base_delay: Duration,

    /// Cap on any single delay.
    ///
    /// Default: 5s
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_ATTEMPTS_COUNT_DEFAULT,
            base_delay: Duration::from_millis(RETRY_DELAY_MS_BASE),
            max_delay: Duration::from_millis(RETRY_DELAY_MS_MAX),
        }
    }
}

impl RetryPolicy {
    /// No retries: one attempt only.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 1, "attempts are 1-based");
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Backlog sizes at which threshold triggers fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogWatermarks {
    /// Unprocessed turns
    pub turns: usize,
    /// Unconsolidated facts
    pub facts: usize,
    /// Undistilled episodes
    pub episodes: usize,
}

impl Default for BacklogWatermarks {
    fn default() -> Self {
        Self {
            turns: BACKLOG_TURNS_WATERMARK_COUNT_DEFAULT,
            facts: BACKLOG_FACTS_WATERMARK_COUNT_DEFAULT,
            episodes: BACKLOG_EPISODES_WATERMARK_COUNT_DEFAULT,
        }
    }
}

// =============================================================================
// LifecycleConfig
// =============================================================================

/// Configuration for the lifecycle engines and trigger coordinator.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use strata_memory::lifecycle::LifecycleConfig;
///
/// let config = LifecycleConfig::default()
///     .with_half_life(Duration::from_secs(3600))
///     .with_min_score(0.4)
///     .with_consolidation_buffer(4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// Significance decay and promotion threshold
    pub decay: DecayConfig,
    /// Fact clustering
    pub consolidation_cluster: ClusterConfig,
    /// Episode clustering
    pub distillation_cluster: ClusterConfig,
    /// Reasoning-service retries
    pub retry: RetryPolicy,
    /// Unconsolidated facts a session needs before an unforced run consolidates
    pub consolidation_buffer_min: usize,
    /// Undistilled episodes needed before an unforced run distills
    pub distillation_buffer_min: usize,
    /// Threshold trigger watermarks
    pub watermarks: BacklogWatermarks,
    /// Turns handed to the extractor per call
    pub promotion_window: usize,
    /// Cognitive event buffer size
    pub event_bus_capacity: usize,
    /// Tier-1 time to live
    pub turn_ttl: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            decay: DecayConfig::default(),
            consolidation_cluster: ClusterConfig::default(),
            distillation_cluster: ClusterConfig {
                // Episodes of different sessions are days apart more often than not.
                time_window: Duration::from_millis(TURN_TTL_MS_DEFAULT),
                ..ClusterConfig::default()
            },
            retry: RetryPolicy::default(),
            consolidation_buffer_min: CONSOLIDATION_BUFFER_FACTS_COUNT_DEFAULT,
            distillation_buffer_min: DISTILLATION_BUFFER_EPISODES_COUNT_DEFAULT,
            watermarks: BacklogWatermarks::default(),
            promotion_window: PROMOTION_WINDOW_TURNS_COUNT_DEFAULT,
            event_bus_capacity: EVENT_BUS_CAPACITY_COUNT_DEFAULT,
            turn_ttl: Duration::from_millis(TURN_TTL_MS_DEFAULT),
        }
    }
}

impl LifecycleConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the decay half-life.
    #[must_use]
    pub fn with_half_life(mut self, half_life: Duration) -> Self {
        self.decay.half_life = half_life;
        self
    }

    /// Set the promotion threshold.
    #[must_use]
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.decay.min_score = min_score;
        self
    }

    /// Set fact clustering parameters.
    #[must_use]
    pub fn with_consolidation_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.consolidation_cluster = cluster;
        self
    }

    /// Set episode clustering parameters.
    #[must_use]
    pub fn with_distillation_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.distillation_cluster = cluster;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the consolidation buffer minimum.
    #[must_use]
    pub fn with_consolidation_buffer(mut self, facts: usize) -> Self {
        self.consolidation_buffer_min = facts;
        self
    }

    /// Set the distillation buffer minimum.
    #[must_use]
    pub fn with_distillation_buffer(mut self, episodes: usize) -> Self {
        self.distillation_buffer_min = episodes;
        self
    }

    /// Set the threshold trigger watermarks.
    #[must_use]
    pub fn with_watermarks(mut self, watermarks: BacklogWatermarks) -> Self {
        self.watermarks = watermarks;
        self
    }

    /// Set the promotion window size.
    #[must_use]
    pub fn with_promotion_window(mut self, turns: usize) -> Self {
        self.promotion_window = turns;
        self
    }

    /// Set the cognitive event buffer size.
    #[must_use]
    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity;
        self
    }

    /// Set the Tier-1 time to live.
    #[must_use]
    pub fn with_turn_ttl(mut self, ttl: Duration) -> Self {
        self.turn_ttl = ttl;
        self
    }

    /// Check every field.
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decay.half_life < Duration::from_millis(SCORE_DECAY_HALF_LIFE_MS_MIN) {
            return Err(ConfigError::invalid(
                "decay.half_life",
                format!("must be at least {SCORE_DECAY_HALF_LIFE_MS_MIN}ms"),
            ));
        }
        if !(SCORE_MIN..=SCORE_MAX).contains(&self.decay.min_score) {
            return Err(ConfigError::invalid(
                "decay.min_score",
                format!("{} outside [{SCORE_MIN}, {SCORE_MAX}]", self.decay.min_score),
            ));
        }
        for (field, cluster) in [
            ("consolidation_cluster", &self.consolidation_cluster),
            ("distillation_cluster", &self.distillation_cluster),
        ] {
            if !(0.0..=1.0).contains(&cluster.similarity_threshold) {
                return Err(ConfigError::invalid(field, "similarity_threshold outside [0, 1]"));
            }
            if cluster.members_max == 0 || cluster.members_max > CLUSTER_MEMBERS_COUNT_MAX {
                return Err(ConfigError::invalid(
                    field,
                    format!("members_max must be 1..={CLUSTER_MEMBERS_COUNT_MAX}"),
                ));
            }
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > RETRY_ATTEMPTS_COUNT_MAX {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                format!("must be 1..={RETRY_ATTEMPTS_COUNT_MAX}"),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::invalid(
                "retry.base_delay",
                "must not exceed retry.max_delay",
            ));
        }
        if self.promotion_window == 0 || self.promotion_window > PROMOTION_WINDOW_TURNS_COUNT_MAX {
            return Err(ConfigError::invalid(
                "promotion_window",
                format!("must be 1..={PROMOTION_WINDOW_TURNS_COUNT_MAX}"),
            ));
        }
        if self.event_bus_capacity == 0 || self.event_bus_capacity > EVENT_BUS_CAPACITY_COUNT_MAX {
            return Err(ConfigError::invalid(
                "event_bus_capacity",
                format!("must be 1..={EVENT_BUS_CAPACITY_COUNT_MAX}"),
            ));
        }
        if self.watermarks.turns == 0 || self.watermarks.facts == 0 || self.watermarks.episodes == 0
        {
            return Err(ConfigError::invalid("watermarks", "must be positive"));
        }
        Ok(())
    }

    /// Defaults overlaid with `STRATA_*` environment variables, validated.
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable does not parse or the result is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "STRATA_DECAY_HALF_LIFE_MS")? {
            config.decay.half_life = Duration::from_millis(ms);
        }
        if let Some(score) = parse_var(&lookup, "STRATA_MIN_SCORE")? {
            config.decay.min_score = score;
        }
        if let Some(threshold) = parse_var(&lookup, "STRATA_CLUSTER_SIMILARITY")? {
            config.consolidation_cluster.similarity_threshold = threshold;
            config.distillation_cluster.similarity_threshold = threshold;
        }
        if let Some(attempts) = parse_var(&lookup, "STRATA_RETRY_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(n) = parse_var(&lookup, "STRATA_CONSOLIDATION_BUFFER")? {
            config.consolidation_buffer_min = n;
        }
        if let Some(n) = parse_var(&lookup, "STRATA_DISTILLATION_BUFFER")? {
            config.distillation_buffer_min = n;
        }
        if let Some(n) = parse_var(&lookup, "STRATA_WATERMARK_TURNS")? {
            config.watermarks.turns = n;
        }
        if let Some(n) = parse_var(&lookup, "STRATA_WATERMARK_FACTS")? {
            config.watermarks.facts = n;
        }
        if let Some(n) = parse_var(&lookup, "STRATA_WATERMARK_EPISODES")? {
            config.watermarks.episodes = n;
        }
        if let Some(n) = parse_var(&lookup, "STRATA_PROMOTION_WINDOW")? {
            config.promotion_window = n;
        }
        if let Some(n) = parse_var(&lookup, "STRATA_EVENT_BUS_CAPACITY")? {
            config.event_bus_capacity = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "STRATA_TURN_TTL_MS")? {
            config.turn_ttl = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Env {
                var,
                message: e.to_string(),
                value,
            }),
    }
}

// =============================================================================
// Tests
// =============================================================================
