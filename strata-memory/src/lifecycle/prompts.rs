//! Prompt templates for the reasoning service.
//!
//! Every template asks for a justification alongside the decision inputs so
//! that each downstream decision can explain itself.

use crate::storage::{Episode, Fact, Turn};

/// Prefix of one formatted turn line: `[turn <id>] <role>: <text>`.
pub const TURN_LINE_PREFIX: &str = "[turn ";

/// Prefix of one formatted fact or episode line.
pub const ITEM_LINE_PREFIX: &str = "- ";

/// System prompt shared by all lifecycle calls.
pub const LIFECYCLE_SYSTEM_PROMPT: &str =
    "You maintain the long-term memory of a conversational agent. Respond with JSON only.";

/// Fact extraction over a window of turns.
pub const FACT_EXTRACTION_PROMPT: &str = r#"Extract durable facts from the conversation window below.

For every fact give:
- "content": the fact as one self-contained sentence
- "certainty": how sure you are the fact is true, from 0.0 to 1.0
- "impact": how much the fact matters for future conversations, from 0.0 to 1.0
- "turns": the ids of the turns the fact came from
- "justification": one sentence explaining why the fact is worth keeping

Skip greetings, filler, and anything that will not matter later.

Conversation:
{turns}

Return JSON: {"facts": [{"content": "...", "certainty": 0.8, "impact": 0.6, "turns": ["..."], "justification": "..."}]}"#;

/// Episode summarization over a cluster of facts.
pub const EPISODE_SUMMARY_PROMPT: &str = r#"Summarize the related facts below into one episode.

Facts:
{facts}

Name the entities involved and the relations between them.

Return JSON: {"summary": "...", "entities": ["..."], "relations": [{"source": "...", "relation": "...", "target": "..."}]}"#;

/// Knowledge synthesis over a cluster of episodes.
pub const KNOWLEDGE_SYNTHESIS_PROMPT: &str = r#"Synthesize the episodes below into one piece of knowledge that stays true outside the sessions it came from.

Episodes:
{episodes}

Return JSON: {"content": "...", "justification": "..."}"#;

/// Format one turn as a single prompt line.
#[must_use]
pub fn format_turn(turn: &Turn) -> String {
    let text = turn.text.replace(['\n', '\r'], " ");
    format!("{TURN_LINE_PREFIX}{}] {}: {}", turn.id, turn.role.as_str(), text.trim())
}

/// Build the extraction prompt for a window of turns.
#[must_use]
pub fn build_extraction_prompt(turns: &[Turn]) -> String {
    let lines: Vec<String> = turns.iter().map(format_turn).collect();
    FACT_EXTRACTION_PROMPT.replace("{turns}", &lines.join("\n"))
}

/// Build the summarization prompt for a cluster of facts.
#[must_use]
pub fn build_episode_prompt(facts: &[Fact]) -> String {
    let lines: Vec<String> = facts
        .iter()
        .map(|f| format!("{ITEM_LINE_PREFIX}{}", f.content.replace('\n', " ")))
        .collect();
    EPISODE_SUMMARY_PROMPT.replace("{facts}", &lines.join("\n"))
}

/// Build the synthesis prompt for a cluster of episodes.
#[must_use]
pub fn build_knowledge_prompt(episodes: &[Episode]) -> String {
    let lines: Vec<String> = episodes
        .iter()
        .map(|e| format!("{ITEM_LINE_PREFIX}{}", e.summary.replace('\n', " ")))
        .collect();
    KNOWLEDGE_SYNTHESIS_PROMPT.replace("{episodes}", &lines.join("\n"))
}
