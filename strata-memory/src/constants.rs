//! `TigerStyle` Constants
//!
//! All limits use big-endian naming: `CATEGORY_SPECIFICS_UNIT_LIMIT`
//! Example: `FACT_CONTENT_BYTES_MAX` (not `MAX_FACT_CONTENT`)
//!
//! Every constant includes units in the name:
//! - _`BYTES_MAX/MIN` for size limits
//! - _`MS_DEFAULT` for time durations
//! - _`COUNT_MAX` for quantity limits

// =============================================================================
// Tier 1: Turns
// =============================================================================

/// Maximum size of a single conversational turn
pub const TURN_TEXT_BYTES_MAX: usize = 64 * 1024; // 64KB

/// Maximum length of a session id
pub const SESSION_ID_BYTES_MAX: usize = 256;

/// Default time-to-live for Tier-1 turns
pub const TURN_TTL_MS_DEFAULT: u64 = TIME_MS_PER_DAY * 7;

// =============================================================================
// Significance Scoring
// =============================================================================

/// Default half-life of the recency decay
pub const SCORE_DECAY_HALF_LIFE_MS_DEFAULT: u64 = TIME_MS_PER_DAY;

/// Minimum half-life (a zero half-life would make decay undefined)
pub const SCORE_DECAY_HALF_LIFE_MS_MIN: u64 = 1;

/// Default promotion threshold (inclusive)
pub const SCORE_PROMOTION_THRESHOLD_DEFAULT: f64 = 0.5;

/// Minimum certainty / impact / score
pub const SCORE_MIN: f64 = 0.0;

/// Maximum certainty / impact / score
pub const SCORE_MAX: f64 = 1.0;

// =============================================================================
// Tier 2: Facts
// =============================================================================

/// Maximum size of fact content
pub const FACT_CONTENT_BYTES_MAX: usize = 4 * 1024;

/// Maximum size of a justification string (facts and events)
pub const JUSTIFICATION_BYTES_MAX: usize = 512;

/// Maximum number of candidate facts accepted from one extraction call
pub const EXTRACTION_CANDIDATES_COUNT_MAX: usize = 64;

/// Default number of turns handed to the extractor in one window
pub const PROMOTION_WINDOW_TURNS_COUNT_DEFAULT: usize = 32;

/// Maximum number of turns in one extraction window
pub const PROMOTION_WINDOW_TURNS_COUNT_MAX: usize = 256;

/// How long a window claim holds before another run may take it over
pub const PROMOTION_CLAIM_TTL_MS: u64 = TIME_MS_PER_MIN * 5;

// =============================================================================
// Clustering
// =============================================================================

/// Default Jaccard similarity needed to join an existing cluster
pub const CLUSTER_SIMILARITY_THRESHOLD_DEFAULT: f64 = 0.2;

/// Default maximum gap between a candidate and a cluster's newest member
pub const CLUSTER_TIME_WINDOW_MS_DEFAULT: u64 = TIME_MS_PER_HOUR * 6;

/// Maximum members in one cluster
pub const CLUSTER_MEMBERS_COUNT_MAX: usize = 64;

/// Minimum length of a term considered for topical similarity
pub const CLUSTER_TERM_CHARS_MIN: usize = 3;

// =============================================================================
// Tier 3: Episodes
// =============================================================================

/// Maximum size of an episode summary
pub const EPISODE_SUMMARY_BYTES_MAX: usize = 8 * 1024;

/// Maximum entities attached to one episode
pub const EPISODE_ENTITIES_COUNT_MAX: usize = 32;

/// Maximum relations attached to one episode
pub const EPISODE_RELATIONS_COUNT_MAX: usize = 64;

/// Default minimum unconsolidated facts before a threshold run consolidates
pub const CONSOLIDATION_BUFFER_FACTS_COUNT_DEFAULT: usize = 8;

// =============================================================================
// Tier 4: Knowledge
// =============================================================================

/// Maximum size of a knowledge unit
pub const KNOWLEDGE_CONTENT_BYTES_MAX: usize = 16 * 1024;

/// Default minimum undistilled episodes before a threshold run distills
pub const DISTILLATION_BUFFER_EPISODES_COUNT_DEFAULT: usize = 4;

/// Maximum results from a search query
pub const SEARCH_RESULTS_COUNT_MAX: usize = 100;

// =============================================================================
// Trigger Coordination
// =============================================================================

/// Default Tier-1 backlog watermark (unprocessed turns)
pub const BACKLOG_TURNS_WATERMARK_COUNT_DEFAULT: usize = 64;

/// Default Tier-2 backlog watermark (unconsolidated facts)
pub const BACKLOG_FACTS_WATERMARK_COUNT_DEFAULT: usize = 32;

/// Default Tier-3 backlog watermark (undistilled episodes)
pub const BACKLOG_EPISODES_WATERMARK_COUNT_DEFAULT: usize = 16;

/// Default capacity of the trigger worker queue
pub const TRIGGER_QUEUE_CAPACITY_COUNT_DEFAULT: usize = 256;

/// Maximum passes a drain loop makes over one tier before yielding
pub const DRAIN_PASSES_COUNT_MAX: usize = 1024;

// =============================================================================
// Cognitive Event Bus
// =============================================================================

/// Default event bus capacity
pub const EVENT_BUS_CAPACITY_COUNT_DEFAULT: usize = 1024;

/// Maximum event bus capacity
pub const EVENT_BUS_CAPACITY_COUNT_MAX: usize = 1 << 16;

// =============================================================================
// Retry Policy
// =============================================================================

/// Default attempts for a retryable reasoning-service call
pub const RETRY_ATTEMPTS_COUNT_DEFAULT: u32 = 3;

/// Maximum attempts for a retryable reasoning-service call
pub const RETRY_ATTEMPTS_COUNT_MAX: u32 = 10;

/// Base delay for exponential backoff
pub const RETRY_DELAY_MS_BASE: u64 = 100;

/// Cap on a single backoff delay
pub const RETRY_DELAY_MS_MAX: u64 = 5_000;

// =============================================================================
// LLM Limits
// =============================================================================

/// Maximum prompt size
pub const LLM_PROMPT_BYTES_MAX: usize = 256 * 1024;

/// Maximum response size
pub const LLM_RESPONSE_BYTES_MAX: usize = 64 * 1024;

/// Default simulated LLM latency
pub const LLM_LATENCY_MS_DEFAULT: u64 = 100;

/// Minimum simulated LLM latency
pub const LLM_LATENCY_MS_MIN: u64 = 1;

/// Maximum simulated LLM latency
pub const LLM_LATENCY_MS_MAX: u64 = 60_000;

/// Maximum tokens requested for extraction/synthesis completions
pub const LLM_COMPLETION_TOKENS_MAX: usize = 2048;

// =============================================================================
// Embeddings
// =============================================================================

/// Embedding vector dimensions
pub const EMBEDDING_DIMENSIONS_COUNT: usize = 256;

// =============================================================================
// DST (Deterministic Simulation Testing)
// =============================================================================

/// Maximum simulation steps
pub const DST_SIMULATION_STEPS_MAX: u64 = 1_000_000;

/// Maximum single time advance
pub const DST_TIME_ADVANCE_MS_MAX: u64 = TIME_MS_PER_DAY * 365;

/// Maximum fault injection probability
pub const DST_FAULT_PROBABILITY_MAX: f64 = 1.0;

// =============================================================================
// Time Constants
// =============================================================================

/// Milliseconds per second
pub const TIME_MS_PER_SEC: u64 = 1000;

/// Milliseconds per minute
pub const TIME_MS_PER_MIN: u64 = 60 * TIME_MS_PER_SEC;

/// Milliseconds per hour
pub const TIME_MS_PER_HOUR: u64 = 60 * TIME_MS_PER_MIN;

/// Milliseconds per day
pub const TIME_MS_PER_DAY: u64 = 24 * TIME_MS_PER_HOUR;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_limits_valid() {
        assert!(SCORE_MIN < SCORE_MAX);
        assert!((SCORE_MIN..=SCORE_MAX).contains(&SCORE_PROMOTION_THRESHOLD_DEFAULT));
        assert!(SCORE_DECAY_HALF_LIFE_MS_DEFAULT >= SCORE_DECAY_HALF_LIFE_MS_MIN);
    }

    #[test]
    fn test_window_limits_valid() {
        assert!(PROMOTION_WINDOW_TURNS_COUNT_DEFAULT <= PROMOTION_WINDOW_TURNS_COUNT_MAX);
        assert!(PROMOTION_WINDOW_TURNS_COUNT_DEFAULT > 0);
    }

    #[test]
    fn test_retry_limits_valid() {
        assert!(RETRY_ATTEMPTS_COUNT_DEFAULT <= RETRY_ATTEMPTS_COUNT_MAX);
        assert!(RETRY_DELAY_MS_BASE <= RETRY_DELAY_MS_MAX);
    }

    #[test]
    fn test_event_bus_limits_valid() {
        assert!(EVENT_BUS_CAPACITY_COUNT_DEFAULT <= EVENT_BUS_CAPACITY_COUNT_MAX);
        assert!(JUSTIFICATION_BYTES_MAX > 0);
    }

    #[test]
    fn test_time_constants_consistent() {
        assert_eq!(TIME_MS_PER_MIN, 60_000);
        assert_eq!(TIME_MS_PER_HOUR, 3_600_000);
        assert_eq!(TIME_MS_PER_DAY, 86_400_000);
    }
}
