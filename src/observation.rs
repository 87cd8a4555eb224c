//! # Stage: Observation Record
//!
//! ## Responsibility
//! The canonical per-turn record. One assistant turn produces exactly one
//! [`Observation`] carrying five sub-observations, each feeding one observer.
//!
//! ## Guarantees
//! - Immutable once built: observers receive `&Observation` (shared via `Arc`)
//! - Ranged fields are clamped by the parser before construction
//! - Enumerated fields only ever hold known tokens
//!
//! ## NOT Responsible For
//! - Decoding generator output (that is [`crate::parser`])
//! - Persistence (only the observers' derived state is stored)

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Token enums
// ---------------------------------------------------------------------------

/// Declares a closed set of snake_case tokens with lossless string round-trip.
macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $token:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire token for this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }

            /// Case-insensitive lookup; unknown tokens yield `None`.
            pub fn from_token(s: &str) -> Option<Self> {
                let s = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

token_enum! {
    /// Kind of failure event reported in a scar observation.
    ScarKind {
        UserCorrection => "user_correction",
        ToolError => "tool_error",
        SelfCatch => "self_catch",
        Rejection => "rejection",
    }
}

token_enum! {
    /// Root-cause category of a scar.
    ScarCategory {
        Overconfidence => "overconfidence",
        WrongFraming => "wrong_framing",
        ScopeBlindness => "scope_blindness",
        Assumption => "assumption",
        PatternMismatch => "pattern_mismatch",
        Communication => "communication",
    }
}

token_enum! {
    /// How the user responded to the previous turn.
    UserSignal {
        Accept => "accept",
        Modify => "modify",
        Reject => "reject",
        Defer => "defer",
        Rework => "rework",
    }
}

token_enum! {
    /// Who drove the interaction.
    Initiative {
        User => "user",
        Agent => "agent",
    }
}

token_enum! {
    /// Whether the user message continues the conversation or starts anew.
    SessionContinuity {
        Continuation => "continuation",
        NewTopic => "new_topic",
        NewSession => "new_session",
    }
}

token_enum! {
    /// Broad class of the interaction.
    InteractionType {
        Routine => "routine",
        Creative => "creative",
        ProblemSolving => "problem_solving",
        Social => "social",
    }
}

token_enum! {
    /// How tight the context window felt to the generator.
    ContextPressure {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

impl Default for Initiative {
    fn default() -> Self {
        Initiative::User
    }
}

impl Default for SessionContinuity {
    fn default() -> Self {
        SessionContinuity::Continuation
    }
}

impl Default for InteractionType {
    fn default() -> Self {
        InteractionType::Routine
    }
}

impl Default for ContextPressure {
    fn default() -> Self {
        ContextPressure::Low
    }
}

// ---------------------------------------------------------------------------
// Sub-observations
// ---------------------------------------------------------------------------

/// Was this turn a repeat of a known action? Feeds the pattern cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternObservation {
    pub matched: bool,
    pub pattern_id: Option<String>,
    /// `None` for a pure-text turn.
    pub tool_used: Option<String>,
    /// Sorted so that the parameter signature is canonical.
    pub parameters: BTreeMap<String, String>,
    pub intent: String,
    /// Similarity to the closest known pattern, in [0, 1].
    pub similarity: f64,
}

/// Did something go wrong? Feeds the scar registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScarObservation {
    pub triggered: bool,
    #[serde(rename = "type")]
    pub kind: Option<ScarKind>,
    pub description: Option<String>,
    pub category: Option<ScarCategory>,
}

/// How did the user respond? Feeds the competence tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetenceObservation {
    pub domain: String,
    pub signal: Option<UserSignal>,
    pub initiative: Initiative,
    /// Complexity estimate in [1, 5].
    pub complexity: f64,
}

/// One communication data point. Feeds the gradient log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientObservation {
    pub person: Option<String>,
    /// Word count of the user's message, computed by the pipeline.
    pub user_message_length: usize,
    pub session_continuity: SessionContinuity,
    /// Sentiment in [-1, 1].
    pub sentiment: f64,
    pub interaction_type: InteractionType,
}

/// Which context was actually useful? Feeds the memory tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRelevanceObservation {
    /// Computed by the pipeline from the system context length.
    pub chunks_in_context: u64,
    pub chunks_referenced: u64,
    pub skills_used: Vec<String>,
    pub context_pressure: ContextPressure,
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// The complete record emitted after every assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub turn_number: u64,
    pub pattern: PatternObservation,
    pub scar: ScarObservation,
    pub competence: CompetenceObservation,
    pub gradient: GradientObservation,
    pub memory: MemoryRelevanceObservation,
}

impl Observation {
    /// RFC 3339 timestamp with millisecond precision and a `Z` suffix.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Calendar day (`YYYY-MM-DD`) of the timestamp.
    pub fn date_string(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}
