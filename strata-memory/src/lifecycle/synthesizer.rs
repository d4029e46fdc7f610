//! KnowledgeSynthesizer - cluster condensation via the reasoning service
//!
//! Two calls share one retry discipline:
//! - `summarize_episode`: facts -> episode summary, entities, relations
//! - `synthesize_knowledge`: episodes -> session-independent knowledge text

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use super::config::RetryPolicy;
use super::prompts::{build_episode_prompt, build_knowledge_prompt, LIFECYCLE_SYSTEM_PROMPT};
use super::retry::retry_with_backoff;
use crate::clock::Clock;
use crate::constants::{
    EPISODE_ENTITIES_COUNT_MAX, EPISODE_RELATIONS_COUNT_MAX, EPISODE_SUMMARY_BYTES_MAX,
    KNOWLEDGE_CONTENT_BYTES_MAX, LLM_COMPLETION_TOKENS_MAX, LLM_PROMPT_BYTES_MAX,
};
use crate::events::truncate_justification;
use crate::llm::{CompletionRequest, LLMProvider, ProviderError};
use crate::storage::{Episode, Fact, Relation};

/// Errors from synthesis calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthesisError {
    /// Nothing to synthesize
    #[error("synthesis input is empty")]
    EmptyInput,

    /// The cluster does not fit in one prompt
    #[error("synthesis prompt too large: {bytes} bytes")]
    PromptTooLarge {
        /// Prompt size
        bytes: usize,
    },

    /// Transient failures, including unusable responses, outlasted the retry budget
    #[error("reasoning service unavailable after {attempts} attempts: {message}")]
    Unavailable {
        /// Attempts made
        attempts: u32,
        /// Last error
        message: String,
    },

    /// The service refused the request outright
    #[error("synthesis rejected: {message}")]
    Rejected {
        /// Service error
        message: String,
    },
}

impl SynthesisError {
    /// Whether a later run might succeed with the same input.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Episode content produced from a fact cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeDraft {
    /// Narrative summary
    pub summary: String,
    /// Distinct entities, at most `EPISODE_ENTITIES_COUNT_MAX`
    pub entities: Vec<String>,
    /// Well-formed relations, at most `EPISODE_RELATIONS_COUNT_MAX`
    pub relations: Vec<Relation>,
}

/// Knowledge content produced from an episode cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeDraft {
    /// Knowledge text
    pub content: String,
    /// Why it holds, bounded
    pub justification: String,
}

#[derive(Debug, Deserialize)]
struct RawEpisode {
    summary: Option<String>,
    #[serde(default)]
    entities: Vec<serde_json::Value>,
    #[serde(default)]
    relations: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    source: String,
    relation: String,
    target: String,
}

#[derive(Debug, Deserialize)]
struct RawKnowledge {
    content: String,
    #[serde(default)]
    justification: Option<String>,
}

/// Condenses clusters through the reasoning service.
pub struct KnowledgeSynthesizer {
    provider: Arc<dyn LLMProvider>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl KnowledgeSynthesizer {
    /// Create a synthesizer.
    #[must_use]
    pub fn new(provider: Arc<dyn LLMProvider>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            retry,
            clock,
        }
    }

    /// Summarize a fact cluster into episode content.
    ///
    /// Malformed entities and relations are dropped; a missing summary falls
    /// back to the joined fact contents.
    ///
    /// # Errors
    /// Returns `SynthesisError` if `facts` is empty or the service stays
    /// unavailable.
    #[tracing::instrument(skip(self, facts), fields(fact_count = facts.len()))]
    pub async fn summarize_episode(&self, facts: &[Fact]) -> Result<EpisodeDraft, SynthesisError> {
        if facts.is_empty() {
            return Err(SynthesisError::EmptyInput);
        }

        let raw: RawEpisode = self
            .call("episode_summary", build_episode_prompt(facts))
            .await?;

        let summary = raw
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                facts
                    .iter()
                    .map(|f| f.content.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            });

        let mut seen = HashSet::new();
        let entities: Vec<String> = raw
            .entities
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
            .take(EPISODE_ENTITIES_COUNT_MAX)
            .collect();

        let relations: Vec<Relation> = raw
            .relations
            .into_iter()
            .filter_map(|v| serde_json::from_value::<RawRelation>(v).ok())
            .filter(|r| !r.source.is_empty() && !r.relation.is_empty() && !r.target.is_empty())
            .map(|r| Relation {
                source: r.source,
                relation: r.relation,
                target: r.target,
            })
            .take(EPISODE_RELATIONS_COUNT_MAX)
            .collect();

        Ok(EpisodeDraft {
            summary: truncate_to(summary, EPISODE_SUMMARY_BYTES_MAX),
            entities,
            relations,
        })
    }

    /// Synthesize an episode cluster into knowledge content.
    ///
    /// # Errors
    /// Returns `SynthesisError` if `episodes` is empty or the service stays
    /// unavailable.
    #[tracing::instrument(skip(self, episodes), fields(episode_count = episodes.len()))]
    pub async fn synthesize_knowledge(
        &self,
        episodes: &[Episode],
    ) -> Result<KnowledgeDraft, SynthesisError> {
        if episodes.is_empty() {
            return Err(SynthesisError::EmptyInput);
        }

        let raw: RawKnowledge = self
            .call("knowledge_synthesis", build_knowledge_prompt(episodes))
            .await?;

        Ok(KnowledgeDraft {
            content: truncate_to(raw.content.trim().to_string(), KNOWLEDGE_CONTENT_BYTES_MAX),
            justification: truncate_justification(
                raw.justification
                    .unwrap_or_else(|| format!("Synthesized from {} episodes.", episodes.len())),
            ),
        })
    }

    async fn call<T>(&self, operation: &'static str, prompt: String) -> Result<T, SynthesisError>
    where
        T: for<'de> Deserialize<'de> + Send + Usable,
    {
        if prompt.len() > LLM_PROMPT_BYTES_MAX {
            return Err(SynthesisError::PromptTooLarge {
                bytes: prompt.len(),
            });
        }
        let request = CompletionRequest::new(prompt)
            .with_system(LIFECYCLE_SYSTEM_PROMPT)
            .with_max_tokens(LLM_COMPLETION_TOKENS_MAX)
            .with_temperature(0.0)
            .with_json_mode();

        retry_with_backoff(
            &self.retry,
            self.clock.as_ref(),
            operation,
            ProviderError::is_retryable,
            || async {
                let text = self.provider.complete(&request).await?;
                let parsed: T = serde_json::from_str(&text)
                    .map_err(|e| ProviderError::invalid_response(e.to_string()))?;
                if parsed.is_usable() {
                    Ok(parsed)
                } else {
                    Err(ProviderError::invalid_response("response has no usable content"))
                }
            },
        )
        .await
        .map_err(|failure| match failure.error {
            ProviderError::ContextOverflow { bytes } => SynthesisError::PromptTooLarge { bytes },
            error if failure.exhausted => SynthesisError::Unavailable {
                attempts: failure.attempts,
                message: error.to_string(),
            },
            error => SynthesisError::Rejected {
                message: error.to_string(),
            },
        })
    }
}

/// Minimum shape a parsed response needs before it is accepted.
trait Usable {
    fn is_usable(&self) -> bool;
}

impl Usable for RawEpisode {
    fn is_usable(&self) -> bool {
        true
    }
}

impl Usable for RawKnowledge {
    fn is_usable(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

fn truncate_to(mut text: String, bytes_max: usize) -> String {
    if text.len() > bytes_max {
        let mut cut = bytes_max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
