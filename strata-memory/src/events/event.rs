//! Cognitive event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::JUSTIFICATION_BYTES_MAX;

const EVENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x8e3f_41c2_6d7a_4b95_b0e4_71a9_5c2d_f806);

/// The engine that made a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Tier 1 -> Tier 2
    Promotion,
    /// Tier 2 -> Tier 3
    Consolidation,
    /// Tier 3 -> Tier 4
    Distillation,
}

impl Component {
    /// String representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promotion => "promotion",
            Self::Consolidation => "consolidation",
            Self::Distillation => "distillation",
        }
    }
}

/// Coarse decision kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A candidate became a fact
    Promote,
    /// A candidate was discarded
    Reject,
    /// Facts became an episode
    Consolidate,
    /// Episodes became a knowledge unit
    Distill,
}

impl EventType {
    /// String representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promote => "PROMOTE",
            Self::Reject => "REJECT",
            Self::Consolidate => "CONSOLIDATE",
            Self::Distill => "DISTILL",
        }
    }
}

/// What was decided, with the numbers behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// Score met the threshold
    Promote {
        /// Significance score
        score: f64,
        /// Threshold in force
        threshold: f64,
        /// Extracted certainty
        certainty: f64,
        /// Extracted impact
        impact: f64,
    },
    /// Score fell below the threshold
    Reject {
        /// Significance score
        score: f64,
        /// Threshold in force
        threshold: f64,
        /// Extracted certainty
        certainty: f64,
        /// Extracted impact
        impact: f64,
    },
    /// A cluster of facts was written as one episode
    Consolidate {
        /// Episode written
        episode_id: String,
        /// Facts folded in
        fact_count: usize,
    },
    /// A cluster of episodes was written as one knowledge unit
    Distill {
        /// Unit written
        unit_id: String,
        /// Episodes folded in
        episode_count: usize,
    },
}

impl Decision {
    /// Coarse kind of this decision.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Promote { .. } => EventType::Promote,
            Self::Reject { .. } => EventType::Reject,
            Self::Consolidate { .. } => EventType::Consolidate,
            Self::Distill { .. } => EventType::Distill,
        }
    }
}

/// A structured record of one lifecycle decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveEvent {
    /// Event id, derived from component, decision kind, subject and time
    pub id: Uuid,
    /// Deciding engine
    pub component: Component,
    /// Record the decision is about (fact, episode or unit id)
    pub subject_id: String,
    /// The decision
    pub decision: Decision,
    /// Why, in at most `JUSTIFICATION_BYTES_MAX` bytes
    pub justification: String,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
}

impl CognitiveEvent {
    /// Create an event. Justifications over the bound are truncated on a
    /// char boundary.
    ///
    /// # Panics
    /// Panics if `subject_id` is empty.
    #[must_use]
    pub fn new(
        component: Component,
        subject_id: impl Into<String>,
        decision: Decision,
        justification: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let subject_id = subject_id.into();
        assert!(!subject_id.is_empty(), "event subject must not be empty");

        let name = format!(
            "{}:{}:{subject_id}:{}",
            component.as_str(),
            decision.event_type().as_str(),
            timestamp.timestamp_millis()
        );
        let event = Self {
            id: Uuid::new_v5(&EVENT_ID_NAMESPACE, name.as_bytes()),
            component,
            subject_id,
            decision,
            justification: truncate_justification(justification.into()),
            timestamp,
        };

        debug_assert!(event.justification.len() <= JUSTIFICATION_BYTES_MAX);
        event
    }

    /// Coarse kind of this event.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.decision.event_type()
    }
}

/// Cut `text` to `JUSTIFICATION_BYTES_MAX` bytes without splitting a char.
#[must_use]
pub fn truncate_justification(mut text: String) -> String {
    if text.len() > JUSTIFICATION_BYTES_MAX {
        let mut cut = JUSTIFICATION_BYTES_MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
