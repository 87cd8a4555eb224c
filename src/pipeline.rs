//! # Stage: Pipeline Driver
//!
//! ## Responsibility
//! Per-turn orchestration for a host agent runtime: hand out the protocol
//! prompt at turn start; at turn end pull the last assistant and user text out
//! of the message list, parse the observation, fan it out, and cycle the
//! observers' durable state.
//!
//! ## Guarantees
//! - Never fails the turn: every error stops at the registry boundary as a log
//!   record
//! - The registry is built and initialized lazily on the first turn start
//! - The caller always gets back the assistant text with the observation block
//!   removed
//!
//! ## NOT Responsible For
//! - Talking to a model
//! - Cross-process coordination on the workspace

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::PipelineConfig;
use crate::observers::BuiltinObservers;
use crate::parser::{self, TurnContext};
use crate::prompt;
use crate::registry::{EmitReport, ObserverRegistry};

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 4;
/// Approximate tokens per memory chunk.
pub const TOKENS_PER_CHUNK: usize = 300;

const UNKNOWN_SESSION: &str = "unknown";

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One content block of a structured message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// Message content as hosts send it: a plain string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// The string itself, or every `text` block concatenated.
    pub fn plain_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.kind == "text")
                .filter_map(|b| b.text.as_deref())
                .collect(),
        }
    }

    /// Character length used by the chunk heuristic; structured content is
    /// measured as its JSON encoding.
    fn measured_len(&self) -> usize {
        match self {
            MessageContent::Text(s) => s.chars().count(),
            MessageContent::Blocks(_) => serde_json::to_string(self)
                .map(|s| s.chars().count())
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Text(content.into())),
        }
    }

    pub fn blocks(role: &str, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Blocks(blocks)),
        }
    }
}

fn last_text(messages: &[ChatMessage], role: &str) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == role)
        .and_then(|m| m.content.as_ref())
        .map(MessageContent::plain_text)
}

/// Estimate memory chunks in context:
/// `round(total system content length / (CHARS_PER_TOKEN * TOKENS_PER_CHUNK))`.
pub fn count_chunks_in_context(messages: &[ChatMessage]) -> u64 {
    let total: usize = messages
        .iter()
        .filter(|m| m.role == "system")
        .filter_map(|m| m.content.as_ref())
        .map(MessageContent::measured_len)
        .sum();
    (total as f64 / (CHARS_PER_TOKEN * TOKENS_PER_CHUNK) as f64).round() as u64
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What `turn_end` hands back to the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Last assistant text with the observation block removed; `None` when
    /// the turn had no assistant text.
    pub visible_text: Option<String>,
    pub emitted: bool,
    pub report: Option<EmitReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub initialized: bool,
    pub workspace: PathBuf,
    pub observers: usize,
    pub observer_ids: Vec<&'static str>,
    pub turns: u64,
    pub emitted: u64,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.initialized {
            return write!(f, "not initialized yet; run a turn first");
        }
        write!(
            f,
            "observers: {} [{}], turns: {}, observations emitted: {}",
            self.observers,
            self.observer_ids.join(", "),
            self.turns,
            self.emitted
        )
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct Active {
    registry: ObserverRegistry,
    builtins: BuiltinObservers,
}

/// Session context owned by the host driver.
pub struct Pipeline {
    config: PipelineConfig,
    workspace: PathBuf,
    active: Option<Active>,
    turns: u64,
    emitted: u64,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workspace", &self.workspace)
            .field("initialized", &self.active.is_some())
            .field("turns", &self.turns)
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl Pipeline {
    /// Build with the workspace resolved from `config` and the environment.
    pub fn new(config: PipelineConfig) -> Self {
        let workspace = config.resolve_workspace(None);
        Self::with_workspace(config, workspace)
    }

    pub fn with_workspace(config: PipelineConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workspace: workspace.into(),
            active: None,
            turns: 0,
            emitted: 0,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// Typed access to the built-in observers once initialized.
    pub fn observers(&self) -> Option<&BuiltinObservers> {
        self.active.as_ref().map(|a| &a.builtins)
    }

    /// Start a turn: initialize on first use, count the turn, and return the
    /// protocol text to append to the system prompt.
    pub async fn turn_start(&mut self) -> &'static str {
        if self.active.is_none() {
            let builtins = BuiltinObservers::new(self.config.streak_mode);
            let mut registry = ObserverRegistry::new(self.workspace.clone());
            builtins.register_into(&mut registry);
            registry.initialize_all().await;
            tracing::info!(
                target: "multicomp::pipeline",
                observers = registry.count(),
                ids = %registry.ids().join(", "),
                workspace = %self.workspace.display(),
                "observers initialized"
            );
            self.active = Some(Active { registry, builtins });
        }

        self.turns += 1;
        if self.config.minimal_prompt {
            prompt::observation_prompt_minimal()
        } else {
            prompt::observation_prompt()
        }
    }

    /// Finish a turn. Parses the last assistant message and, when an
    /// observation is found, fans it out and cycles observer state.
    pub async fn turn_end(
        &mut self,
        session_id: Option<&str>,
        messages: &[ChatMessage],
        success: bool,
    ) -> TurnOutcome {
        let Some(assistant_text) = last_text(messages, "assistant").filter(|t| !t.is_empty()) else {
            return TurnOutcome::default();
        };
        let visible_text = Some(parser::strip_observation_block(&assistant_text));

        let Some(active) = self.active.as_ref() else {
            tracing::debug!(target: "multicomp::pipeline", "turn ended before initialization; skipped");
            return TurnOutcome { visible_text, ..Default::default() };
        };
        if !success {
            tracing::debug!(target: "multicomp::pipeline", turn = self.turns, "unsuccessful turn; skipped");
            return TurnOutcome { visible_text, ..Default::default() };
        }

        let ctx = TurnContext {
            session_id: session_id.unwrap_or(UNKNOWN_SESSION).to_string(),
            turn_number: self.turns,
            user_message: last_text(messages, "user").unwrap_or_default(),
            assistant_response: assistant_text,
            chunks_in_context: count_chunks_in_context(messages),
        };

        let Some(observation) = parser::parse_observation(&ctx) else {
            return TurnOutcome { visible_text, ..Default::default() };
        };

        let report = active.registry.emit(Arc::new(observation)).await;
        if self.config.reload_between_turns {
            active.registry.shutdown_all().await;
            active.registry.initialize_all().await;
        }
        self.emitted += 1;

        tracing::info!(
            target: "multicomp::pipeline",
            session = %ctx.session_id,
            turn = ctx.turn_number,
            %report,
            "observation processed"
        );

        TurnOutcome {
            visible_text,
            emitted: true,
            report: Some(report),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            initialized: self.active.is_some(),
            workspace: self.workspace.clone(),
            observers: self.active.as_ref().map_or(0, |a| a.registry.count()),
            observer_ids: self.active.as_ref().map(|a| a.registry.ids()).unwrap_or_default(),
            turns: self.turns,
            emitted: self.emitted,
        }
    }

    /// Flush every observer. Returns how many flushed cleanly.
    pub async fn stop(&mut self) -> usize {
        let Some(active) = self.active.as_ref() else {
            return 0;
        };
        let flushed = active.registry.shutdown_all().await;
        tracing::info!(target: "multicomp::pipeline", flushed, "observers flushed");
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(vec![], 0)]
    #[case::exact_chunk(vec![ChatMessage::new("system", "x".repeat(1200))], 1)]
    #[case::rounds_down(vec![ChatMessage::new("system", "x".repeat(599))], 0)]
    #[case::rounds_up(vec![ChatMessage::new("system", "x".repeat(600))], 1)]
    #[case::sums_system_only(
        vec![
            ChatMessage::new("system", "x".repeat(1200)),
            ChatMessage::new("user", "y".repeat(5000)),
            ChatMessage::new("system", "z".repeat(1200)),
        ],
        2
    )]
    fn test_count_chunks(#[case] messages: Vec<ChatMessage>, #[case] expected: u64) {
        assert_eq!(count_chunks_in_context(&messages), expected);
    }

    #[test]
    fn test_structured_system_content_measured_as_json() {
        let m = ChatMessage::blocks("system", vec![ContentBlock::text("a".repeat(1190))]);
        assert_eq!(count_chunks_in_context(&[m]), 1);
    }

    #[test]
    fn test_plain_text_joins_text_blocks_only() {
        let mut tool = ContentBlock::text("ignored");
        tool.kind = "tool_use".to_string();
        let c = MessageContent::Blocks(vec![ContentBlock::text("Hello, "), tool, ContentBlock::text("world")]);
        assert_eq!(c.plain_text(), "Hello, world");
    }

    #[test]
    fn test_last_text_picks_latest_of_role() {
        let msgs = vec![
            ChatMessage::new("user", "first"),
            ChatMessage::new("assistant", "a1"),
            ChatMessage::new("user", "second"),
        ];
        assert_eq!(last_text(&msgs, "user").as_deref(), Some("second"));
        assert_eq!(last_text(&msgs, "system"), None);
    }

    #[test]
    fn test_message_deserializes_both_content_shapes() {
        let s: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(s.content.unwrap().plain_text(), "hi");
        let b: ChatMessage = serde_json::from_str(
            r#"{"role":"assistant","content":[{"type":"text","text":"a"},{"type":"tool_use","id":"t1"}]}"#,
        )
        .unwrap();
        assert_eq!(b.content.unwrap().plain_text(), "a");
    }

    #[tokio::test]
    async fn test_turn_end_before_start_only_redacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = Pipeline::with_workspace(PipelineConfig::default(), dir.path());
        let out = p
            .turn_end(None, &[ChatMessage::new("assistant", "Hi <obs>{}</obs>")], true)
            .await;
        assert_eq!(out.visible_text.as_deref(), Some("Hi"));
        assert!(!out.emitted);
        assert!(!p.status().initialized);
    }

    #[tokio::test]
    async fn test_turn_start_initializes_once_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = Pipeline::with_workspace(PipelineConfig::default(), dir.path());
        let prompt = p.turn_start().await;
        assert_eq!(prompt, crate::prompt::observation_prompt());
        p.turn_start().await;
        let s = p.status();
        assert!(s.initialized);
        assert_eq!(s.turns, 2);
        assert_eq!(s.observers, 5);
    }

    #[tokio::test]
    async fn test_minimal_prompt_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig { minimal_prompt: true, ..Default::default() };
        let mut p = Pipeline::with_workspace(cfg, dir.path());
        assert_eq!(p.turn_start().await, crate::prompt::observation_prompt_minimal());
    }

    #[test]
    fn test_status_display_uninitialized() {
        let p = Pipeline::with_workspace(PipelineConfig::default(), "/tmp/none");
        assert_eq!(p.status().to_string(), "not initialized yet; run a turn first");
    }
}
