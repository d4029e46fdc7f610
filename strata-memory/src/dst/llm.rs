//! `SimLLM` - Deterministic LLM Simulation
//!
//! `TigerStyle`: Deterministic reasoning-service responses for simulation testing.
//!
//! Prompts are routed by keyword to generators for the three lifecycle calls
//! (fact extraction, episode summarization, knowledge synthesis). Generated
//! content is seeded by the prompt itself, so a retried call returns exactly
//! what the first attempt would have.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde_json::json;

use super::clock::SimClock;
use super::fault::{FaultInjector, FaultType};
use super::rng::DeterministicRng;
use crate::constants::{
    EPISODE_ENTITIES_COUNT_MAX, EPISODE_SUMMARY_BYTES_MAX, KNOWLEDGE_CONTENT_BYTES_MAX,
    LLM_LATENCY_MS_DEFAULT, LLM_LATENCY_MS_MAX, LLM_LATENCY_MS_MIN, LLM_PROMPT_BYTES_MAX,
    LLM_RESPONSE_BYTES_MAX,
};
use crate::lifecycle::prompts::{ITEM_LINE_PREFIX, TURN_LINE_PREFIX};

/// Turns shorter than this carry no extractable fact in simulation.
const SIM_TURN_TEXT_CHARS_MIN: usize = 12;

/// Words that start sentences but never name an entity.
const SIM_ENTITY_STOPWORDS: &[&str] = &[
    "The", "A", "An", "I", "We", "You", "They", "He", "She", "It", "This", "That", "My", "Our",
    "Episode", "Knowledge",
];

// =============================================================================
// Error Types
// =============================================================================

/// Errors from simulated LLM operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    /// Request timed out
    #[error("LLM request timed out")]
    Timeout,

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Context/prompt too long
    #[error("Context length exceeded: {0} bytes")]
    ContextOverflow(usize),

    /// Response format invalid
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    /// Service unavailable
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// Prompt validation failed
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),
}

// =============================================================================
// SimLLM
// =============================================================================

/// Simulated reasoning service for deterministic testing.
///
/// `TigerStyle`:
/// - Responses depend only on seed and prompt
/// - Fault injection on the `llm_complete` operation
/// - Optional latency on the simulated clock
#[derive(Debug, Clone)]
pub struct SimLLM {
    clock: SimClock,
    seed: u64,
    /// Jitter source; content generation uses per-prompt RNGs.
    rng: Arc<Mutex<DeterministicRng>>,
    fault_injector: Arc<FaultInjector>,
    base_latency_ms: u64,
    simulate_latency_enabled: bool,
}

impl SimLLM {
    /// Create a new `SimLLM`.
    #[must_use]
    pub fn new(clock: SimClock, rng: DeterministicRng, fault_injector: Arc<FaultInjector>) -> Self {
        Self {
            clock,
            seed: rng.seed(),
            rng: Arc::new(Mutex::new(rng)),
            fault_injector,
            base_latency_ms: LLM_LATENCY_MS_DEFAULT,
            simulate_latency_enabled: true,
        }
    }

    /// Disable latency simulation (for tests that never advance the clock).
    #[must_use]
    pub fn without_latency(mut self) -> Self {
        self.simulate_latency_enabled = false;
        self
    }

    /// Set base latency for simulated responses.
    ///
    /// # Panics
    /// Panics if latency is outside the valid range.
    #[must_use]
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        assert!(
            (LLM_LATENCY_MS_MIN..=LLM_LATENCY_MS_MAX).contains(&latency_ms),
            "latency must be in [{LLM_LATENCY_MS_MIN}, {LLM_LATENCY_MS_MAX}], got {latency_ms}"
        );
        self.base_latency_ms = latency_ms;
        self
    }

    /// The seed this simulation was created with.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Complete a prompt with a deterministic response.
    ///
    /// # Errors
    /// Returns `LLMError` on fault injection or prompt validation failure.
    pub async fn complete(&self, prompt: &str) -> Result<String, LLMError> {
        if prompt.is_empty() {
            return Err(LLMError::InvalidPrompt("prompt must not be empty".into()));
        }
        if prompt.len() > LLM_PROMPT_BYTES_MAX {
            return Err(LLMError::ContextOverflow(prompt.len()));
        }

        if let Some(fault) = self.fault_injector.should_inject("llm_complete") {
            return Err(fault_to_error(fault));
        }

        self.simulate_latency().await;

        let response = self.route_prompt(prompt);

        debug_assert!(!response.is_empty(), "response must not be empty");
        debug_assert!(
            response.len() <= LLM_RESPONSE_BYTES_MAX,
            "response exceeds limit"
        );
        Ok(response)
    }

    fn route_prompt(&self, prompt: &str) -> String {
        let lower = prompt.to_lowercase();
        let mut rng = DeterministicRng::new(self.seed ^ prompt_hash(prompt));

        if lower.contains("extract") && lower.contains("facts") {
            sim_fact_extraction(prompt, &mut rng)
        } else if lower.contains("synthesize") && lower.contains("knowledge") {
            sim_knowledge_synthesis(prompt)
        } else if lower.contains("summarize") && lower.contains("episode") {
            sim_episode_summary(prompt)
        } else {
            json!({ "response": "Acknowledged.", "prompt_hash": prompt_hash(prompt) }).to_string()
        }
    }

    async fn simulate_latency(&self) {
        if !self.simulate_latency_enabled {
            return;
        }
        let jitter = self.rng.lock().unwrap().next_usize(0, 50) as u64;
        self.clock.sleep_ms(self.base_latency_ms + jitter).await;
    }
}

// =============================================================================
// Generators
// =============================================================================

/// One parsed `[turn <id>] <role>: <text>` line.
struct TurnLine<'a> {
    id: &'a str,
    role: &'a str,
    text: &'a str,
}

fn parse_turn_line(line: &str) -> Option<TurnLine<'_>> {
    let rest = line.strip_prefix(TURN_LINE_PREFIX)?;
    let (id, rest) = rest.split_once("] ")?;
    let (role, text) = rest.split_once(": ")?;
    Some(TurnLine {
        id,
        role,
        text: text.trim(),
    })
}

fn item_lines(prompt: &str) -> Vec<&str> {
    prompt
        .lines()
        .filter_map(|l| l.strip_prefix(ITEM_LINE_PREFIX))
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('"'))
        .collect()
}

fn first_sentence(text: &str) -> &str {
    match text.find(['.', '!', '?']) {
        Some(end) => &text[..=end],
        None => text,
    }
}

fn sim_fact_extraction(prompt: &str, rng: &mut DeterministicRng) -> String {
    let facts: Vec<serde_json::Value> = prompt
        .lines()
        .filter_map(parse_turn_line)
        .filter(|t| t.role != "system" && t.text.chars().count() >= SIM_TURN_TEXT_CHARS_MIN)
        .map(|t| {
            let certainty = round2(rng.next_float_in(0.35, 1.0));
            let impact = round2(rng.next_float_in(0.35, 1.0));
            json!({
                "content": first_sentence(t.text),
                "certainty": certainty,
                "impact": impact,
                "turns": [t.id],
                "justification": format!("The {} stated this directly in turn {}.", t.role, t.id),
            })
        })
        .collect();

    json!({ "facts": facts }).to_string()
}

fn sim_episode_summary(prompt: &str) -> String {
    let facts = item_lines(prompt);
    let summary = truncate(&facts.join(" "), EPISODE_SUMMARY_BYTES_MAX);
    let entities = capitalized_entities(&facts);
    let relations: Vec<serde_json::Value> = entities
        .windows(2)
        .map(|pair| json!({ "source": pair[0], "relation": "mentioned_with", "target": pair[1] }))
        .collect();

    json!({ "summary": summary, "entities": entities, "relations": relations }).to_string()
}

fn sim_knowledge_synthesis(prompt: &str) -> String {
    let episodes = item_lines(prompt);
    let content = truncate(
        &format!(
            "Across {} episodes: {}",
            episodes.len(),
            episodes.join(" ")
        ),
        KNOWLEDGE_CONTENT_BYTES_MAX,
    );

    json!({
        "content": content,
        "justification": format!("Recurs across {} related episodes.", episodes.len()),
    })
    .to_string()
}

fn capitalized_entities(lines: &[&str]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut entities = Vec::new();
    for word in lines.iter().flat_map(|l| l.split_whitespace()) {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        let is_capitalized = word.chars().next().is_some_and(char::is_uppercase);
        if word.len() < 2 || !is_capitalized || SIM_ENTITY_STOPWORDS.contains(&word) {
            continue;
        }
        if seen.insert(word.to_string()) {
            entities.push(word.to_string());
        }
        if entities.len() == EPISODE_ENTITIES_COUNT_MAX {
            break;
        }
    }
    entities
}

fn truncate(text: &str, bytes_max: usize) -> String {
    if text.len() <= bytes_max {
        return text.to_string();
    }
    let mut end = bytes_max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// FNV-1a hash of the prompt.
fn prompt_hash(prompt: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in prompt.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn fault_to_error(fault: FaultType) -> LLMError {
    match fault {
        FaultType::LlmTimeout => LLMError::Timeout,
        FaultType::LlmRateLimit => LLMError::RateLimit,
        FaultType::LlmInvalidResponse => {
            LLMError::InvalidResponse("simulated invalid response".into())
        }
        _ => LLMError::ServiceUnavailable,
    }
}

// =============================================================================
// Tests
// =============================================================================
