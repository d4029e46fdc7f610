//! FactExtractor - turns to candidate facts
//!
//! `TigerStyle`: Stateless per call, validate every item, never trust the
//! shape of a model response.
//!
//! # Failure handling
//!
//! - Transient service failure: retried with bounded backoff, then surfaced
//!   as [`ExtractionError::Unavailable`] so the caller defers the window.
//! - Whole response unparseable: treated as a transient failure and retried.
//! - Single malformed item: discarded and counted, the batch continues.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::config::RetryPolicy;
use super::prompts::{build_extraction_prompt, LIFECYCLE_SYSTEM_PROMPT};
use super::retry::retry_with_backoff;
use crate::clock::Clock;
use crate::constants::{
    EXTRACTION_CANDIDATES_COUNT_MAX, FACT_CONTENT_BYTES_MAX, LLM_COMPLETION_TOKENS_MAX,
    LLM_PROMPT_BYTES_MAX,
};
use crate::events::truncate_justification;
use crate::llm::{CompletionRequest, LLMProvider, ProviderError};
use crate::storage::Turn;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from fact extraction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionError {
    /// No turns to extract from
    #[error("extraction window is empty")]
    EmptyWindow,

    /// The window does not fit in one prompt
    #[error("extraction prompt too large: {bytes} bytes")]
    PromptTooLarge {
        /// Prompt size
        bytes: usize,
    },

    /// Transient failures outlasted the retry budget
    #[error("reasoning service unavailable after {attempts} attempts: {message}")]
    Unavailable {
        /// Attempts made
        attempts: u32,
        /// Last error
        message: String,
    },

    /// The service refused the request outright
    #[error("extraction rejected: {message}")]
    Rejected {
        /// Service error
        message: String,
    },
}

impl ExtractionError {
    /// Whether a later run might succeed with the same window.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

// =============================================================================
// Output Types
// =============================================================================

/// A validated fact candidate, not yet scored.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFact {
    /// Fact text
    pub content: String,
    /// Certainty in [0, 1]
    pub certainty: f64,
    /// Impact in [0, 1]
    pub impact: f64,
    /// Why the fact matters, bounded
    pub justification: String,
    /// Window turns the fact came from, never empty
    pub source_turn_ids: Vec<String>,
    /// Timestamp of the newest source turn
    pub observed_at: DateTime<Utc>,
}

/// Result of one extraction call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutput {
    /// Valid candidates, in response order
    pub candidates: Vec<CandidateFact>,
    /// Items dropped as malformed
    pub discarded: usize,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    facts: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawFact {
    content: Option<String>,
    certainty: Option<f64>,
    impact: Option<f64>,
    #[serde(default)]
    turns: Vec<String>,
    justification: Option<String>,
}

// =============================================================================
// FactExtractor
// =============================================================================

/// Extracts candidate facts from a window of turns.
pub struct FactExtractor {
    provider: Arc<dyn LLMProvider>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl FactExtractor {
    /// Create an extractor.
    #[must_use]
    pub fn new(provider: Arc<dyn LLMProvider>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            retry,
            clock,
        }
    }

    /// Extract candidates from `turns`, which must all belong to `session_id`.
    ///
    /// # Errors
    /// Returns `ExtractionError` if the window is empty or too large, or the
    /// service stays unavailable.
    #[tracing::instrument(skip(self, turns), fields(turn_count = turns.len()))]
    pub async fn extract(
        &self,
        session_id: &str,
        turns: &[Turn],
    ) -> Result<ExtractionOutput, ExtractionError> {
        if turns.is_empty() {
            return Err(ExtractionError::EmptyWindow);
        }
        debug_assert!(
            turns.iter().all(|t| t.session_id == session_id),
            "window mixes sessions"
        );

        let prompt = build_extraction_prompt(turns);
        if prompt.len() > LLM_PROMPT_BYTES_MAX {
            return Err(ExtractionError::PromptTooLarge {
                bytes: prompt.len(),
            });
        }
        let request = CompletionRequest::new(prompt)
            .with_system(LIFECYCLE_SYSTEM_PROMPT)
            .with_max_tokens(LLM_COMPLETION_TOKENS_MAX)
            .with_temperature(0.0)
            .with_json_mode();

        let response = retry_with_backoff(
            &self.retry,
            self.clock.as_ref(),
            "fact_extraction",
            ProviderError::is_retryable,
            || async {
                let text = self.provider.complete(&request).await?;
                serde_json::from_str::<RawResponse>(&text)
                    .map_err(|e| ProviderError::invalid_response(e.to_string()))
            },
        )
        .await
        .map_err(|failure| match failure.error {
            ProviderError::ContextOverflow { bytes } => ExtractionError::PromptTooLarge { bytes },
            error if failure.exhausted => ExtractionError::Unavailable {
                attempts: failure.attempts,
                message: error.to_string(),
            },
            error => ExtractionError::Rejected {
                message: error.to_string(),
            },
        })?;

        let output = validate_items(response.facts, turns);
        if output.discarded > 0 {
            tracing::debug!(
                session_id,
                discarded = output.discarded,
                "discarded malformed extraction items"
            );
        }

        debug_assert!(output.candidates.len() <= EXTRACTION_CANDIDATES_COUNT_MAX);
        Ok(output)
    }
}

fn validate_items(items: Vec<serde_json::Value>, turns: &[Turn]) -> ExtractionOutput {
    let window: HashSet<&str> = turns.iter().map(|t| t.id.as_str()).collect();
    let mut output = ExtractionOutput::default();

    for item in items {
        if output.candidates.len() >= EXTRACTION_CANDIDATES_COUNT_MAX {
            output.discarded += 1;
            continue;
        }
        match serde_json::from_value::<RawFact>(item)
            .ok()
            .and_then(|raw| validate_item(raw, &window, turns))
        {
            Some(candidate) => output.candidates.push(candidate),
            None => output.discarded += 1,
        }
    }
    output
}

fn validate_item(raw: RawFact, window: &HashSet<&str>, turns: &[Turn]) -> Option<CandidateFact> {
    let content = raw.content?.trim().to_string();
    if content.is_empty() || content.len() > FACT_CONTENT_BYTES_MAX {
        return None;
    }
    let certainty = raw.certainty.filter(|v| (0.0..=1.0).contains(v))?;
    let impact = raw.impact.filter(|v| (0.0..=1.0).contains(v))?;
    let justification = raw.justification?.trim().to_string();
    if justification.is_empty() {
        return None;
    }

    let source_turn_ids: Vec<String> = if raw.turns.is_empty() {
        turns.iter().map(|t| t.id.clone()).collect()
    } else {
        if !raw.turns.iter().all(|id| window.contains(id.as_str())) {
            return None;
        }
        let mut ids = raw.turns;
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let observed_at = turns
        .iter()
        .filter(|t| source_turn_ids.contains(&t.id))
        .map(|t| t.timestamp)
        .max()?;

    Some(CandidateFact {
        content,
        certainty,
        impact,
        justification: truncate_justification(justification),
        source_turn_ids,
        observed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dst::{DeterministicRng, FaultConfig, FaultInjectorBuilder, FaultType, SimClock};
    use crate::llm::SimLLMProvider;
    use crate::storage::TurnRole;
    use chrono::Duration;
    use serde_json::json;

    fn turn(id: &str, role: TurnRole, text: &str, secs: i64) -> Turn {
        Turn {
            id: id.to_string(),
            session_id: "s1".to_string(),
            role,
            text: text.to_string(),
            timestamp: DateTime::UNIX_EPOCH + Duration::seconds(secs),
            sequence: 1,
            processed: false,
        }
    }

    fn window() -> Vec<Turn> {
        vec![
            turn("t1", TurnRole::User, "I moved to Oslo last spring.", 10),
            turn("t2", TurnRole::Assistant, "Noted, Oslo it is.", 20),
        ]
    }

    fn extractor(provider: SimLLMProvider) -> FactExtractor {
        FactExtractor::new(Arc::new(provider), RetryPolicy::default(), Arc::new(SimClock::new()))
    }

    #[tokio::test]
    async fn test_extracts_with_justification() {
        let output = extractor(SimLLMProvider::with_seed(42))
            .extract("s1", &window())
            .await
            .unwrap();

        assert!(!output.candidates.is_empty());
        for candidate in &output.candidates {
            assert!(!candidate.justification.is_empty());
            assert!(!candidate.source_turn_ids.is_empty());
        }
    }

    #[tokio::test]
    async fn test_deterministic() {
        let a = extractor(SimLLMProvider::with_seed(42)).extract("s1", &window()).await.unwrap();
        let b = extractor(SimLLMProvider::with_seed(42)).extract("s1", &window()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_empty_window() {
        let result = extractor(SimLLMProvider::with_seed(1)).extract("s1", &[]).await;
        assert!(matches!(result, Err(ExtractionError::EmptyWindow)));
    }

    #[tokio::test]
    async fn test_unavailable_after_retries() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(5))
            .with_fault(FaultConfig::new(FaultType::LlmTimeout, 1.0))
            .build();
        let provider = SimLLMProvider::with_faults(5, Arc::new(faults));

        let result = extractor(provider).extract("s1", &window()).await;

        match result {
            Err(ExtractionError::Unavailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_items_discarded_individually() {
        let items = vec![
            json!({"content": "Lives in Oslo", "certainty": 0.9, "impact": 0.7, "turns": ["t1"], "justification": "stated"}),
            json!({"content": "", "certainty": 0.9, "impact": 0.7, "justification": "empty content"}),
            json!({"content": "Bad certainty", "certainty": 1.4, "impact": 0.7, "justification": "x"}),
            json!({"content": "No justification", "certainty": 0.5, "impact": 0.5}),
            json!({"content": "Foreign turn", "certainty": 0.5, "impact": 0.5, "turns": ["t9"], "justification": "x"}),
            json!({"content": "Whole window", "certainty": 0.5, "impact": 0.5, "justification": "x"}),
            json!("not an object"),
        ];

        let output = validate_items(items, &window());

        assert_eq!(output.candidates.len(), 2);
        assert_eq!(output.discarded, 5);
        assert_eq!(output.candidates[0].source_turn_ids, vec!["t1".to_string()]);
        assert_eq!(output.candidates[0].observed_at, DateTime::UNIX_EPOCH + Duration::seconds(10));
        assert_eq!(output.candidates[1].source_turn_ids.len(), 2);
        assert_eq!(output.candidates[1].observed_at, DateTime::UNIX_EPOCH + Duration::seconds(20));
    }
}
