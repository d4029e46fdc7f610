//! Tier records - Turn, Fact, Episode, KnowledgeUnit
//!
//! `TigerStyle`: Explicit types, validated constructors, provenance on every
//! migrated record.
//!
//! Ids of migrated records are UUID v5 digests of their sources, so a retried
//! migration reproduces the id the failed attempt would have written.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    FACT_CONTENT_BYTES_MAX, JUSTIFICATION_BYTES_MAX, SCORE_MAX, SCORE_MIN, SESSION_ID_BYTES_MAX,
    TURN_TEXT_BYTES_MAX,
};

/// Namespace for deterministic record ids.
const RECORD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5c1d_7a4e_93b2_4f60_8a1e_2d6b_c0f9_3e71);

// =============================================================================
// Turn (Tier 1)
// =============================================================================

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The human
    User,
    /// The agent
    Assistant,
    /// System or tool output
    System,
}

impl TurnRole {
    /// String representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in Tier 1.
///
/// `sequence` is assigned by the store on append and is strictly increasing
/// per session; the session's processed watermark is a sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique id
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Speaker
    pub role: TurnRole,
    /// Utterance text
    pub text: String,
    /// When the turn was spoken
    pub timestamp: DateTime<Utc>,
    /// Arrival order within the session, starting at 1
    pub sequence: u64,
    /// Whether the promotion engine has handled this turn
    pub processed: bool,
}

/// A turn about to be appended.
#[derive(Debug, Clone)]
pub struct NewTurn {
    /// Owning session
    pub session_id: String,
    /// Speaker
    pub role: TurnRole,
    /// Utterance text
    pub text: String,
    /// When the turn was spoken
    pub timestamp: DateTime<Utc>,
}

impl NewTurn {
    /// Create a new turn.
    ///
    /// # Panics
    /// Panics if the session id or text is empty or oversized.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        role: TurnRole,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let session_id = session_id.into();
        let text = text.into();

        assert!(!session_id.is_empty(), "session_id must not be empty");
        assert!(
            session_id.len() <= SESSION_ID_BYTES_MAX,
            "session_id exceeds {SESSION_ID_BYTES_MAX} bytes"
        );
        assert!(!text.is_empty(), "turn text must not be empty");
        assert!(
            text.len() <= TURN_TEXT_BYTES_MAX,
            "turn text exceeds {TURN_TEXT_BYTES_MAX} bytes"
        );

        Self {
            session_id,
            role,
            text,
            timestamp,
        }
    }
}

// =============================================================================
// Fact (Tier 2)
// =============================================================================

/// A promoted unit of knowledge in Tier 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Deterministic id (see [`fact_id`])
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Turns the fact was extracted from
    pub source_turn_ids: Vec<String>,
    /// Fact text
    pub content: String,
    /// Certainty in [0, 1]
    pub certainty: f64,
    /// Impact in [0, 1]
    pub impact: f64,
    /// Significance as of `scored_at`
    pub score: f64,
    /// When `score` was computed
    pub scored_at: DateTime<Utc>,
    /// Why the fact was kept
    pub justification: String,
    /// Timestamp of the newest source turn
    pub observed_at: DateTime<Utc>,
    /// Whether the fact has been folded into an episode
    pub consolidated: bool,
    /// The episode it was folded into
    pub episode_id: Option<String>,
    /// When the fact was promoted
    pub created_at: DateTime<Utc>,
}

impl Fact {
    /// Check field invariants.
    ///
    /// # Errors
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() || self.session_id.is_empty() {
            return Err("fact id and session id must not be empty".into());
        }
        if self.content.is_empty() || self.content.len() > FACT_CONTENT_BYTES_MAX {
            return Err(format!(
                "fact content must be 1..={FACT_CONTENT_BYTES_MAX} bytes"
            ));
        }
        if self.source_turn_ids.is_empty() {
            return Err("fact must reference at least one source turn".into());
        }
        for (name, value) in [
            ("certainty", self.certainty),
            ("impact", self.impact),
            ("score", self.score),
        ] {
            if !(SCORE_MIN..=SCORE_MAX).contains(&value) {
                return Err(format!("{name} {value} outside [{SCORE_MIN}, {SCORE_MAX}]"));
            }
        }
        if self.justification.len() > JUSTIFICATION_BYTES_MAX {
            return Err(format!(
                "justification exceeds {JUSTIFICATION_BYTES_MAX} bytes"
            ));
        }
        if self.consolidated != self.episode_id.is_some() {
            return Err("consolidated flag and episode id disagree".into());
        }
        Ok(())
    }
}

// =============================================================================
// Episode (Tier 3)
// =============================================================================

/// A directed edge between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    /// Source entity
    pub source: String,
    /// Edge label
    pub relation: String,
    /// Target entity
    pub target: String,
}

/// A clustered narrative unit in Tier 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Deterministic id (see [`episode_id`])
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Facts the episode was built from, in observation order
    pub source_fact_ids: Vec<String>,
    /// Narrative summary
    pub summary: String,
    /// Embedding of the summary
    pub embedding: Vec<f32>,
    /// Entities mentioned
    pub entities: Vec<String>,
    /// Entity relations
    pub relations: Vec<Relation>,
    /// Whether the episode has been distilled into knowledge
    pub distilled: bool,
    /// The knowledge unit it was distilled into
    pub knowledge_unit_id: Option<String>,
    /// Timestamp of the newest source fact observation
    pub observed_at: DateTime<Utc>,
    /// When the episode was written
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// KnowledgeUnit (Tier 4)
// =============================================================================

/// Where a knowledge unit came from, transitively.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    /// Sessions that contributed
    pub session_ids: BTreeSet<String>,
    /// Facts that contributed
    pub fact_ids: BTreeSet<String>,
}

/// A semantic, session-independent unit in Tier 4. Terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeUnit {
    /// Deterministic id (see [`knowledge_unit_id`])
    pub id: String,
    /// Episodes the unit was distilled from
    pub source_episode_ids: Vec<String>,
    /// Knowledge text
    pub content: String,
    /// Transitive provenance
    pub provenance: Provenance,
    /// When the unit was indexed
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Deterministic ids
// =============================================================================

fn digest_id(kind: &str, parts: &[&str]) -> String {
    let mut name = String::from(kind);
    for part in parts {
        name.push('\u{1f}');
        name.push_str(part);
    }
    Uuid::new_v5(&RECORD_ID_NAMESPACE, name.as_bytes()).to_string()
}

fn sorted<'a>(ids: &'a [String]) -> Vec<&'a str> {
    let mut ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Id of the `sequence`-th turn of a session.
#[must_use]
pub fn turn_id(session_id: &str, sequence: u64) -> String {
    digest_id("turn", &[session_id, &sequence.to_string()])
}

/// Id of a fact extracted from `source_turn_ids` with `content`.
#[must_use]
pub fn fact_id(session_id: &str, source_turn_ids: &[String], content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut parts = vec![session_id];
    parts.extend(sorted(source_turn_ids));
    parts.push(&normalized);
    digest_id("fact", &parts)
}

/// Id of the episode built from exactly `fact_ids` (order-insensitive).
#[must_use]
pub fn episode_id(fact_ids: &[String]) -> String {
    digest_id("episode", &sorted(fact_ids))
}

/// Id of the knowledge unit distilled from exactly `episode_ids` (order-insensitive).
#[must_use]
pub fn knowledge_unit_id(episode_ids: &[String]) -> String {
    digest_id("knowledge", &sorted(episode_ids))
}
