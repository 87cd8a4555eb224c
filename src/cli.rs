use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::*;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::observers::pattern::metrics_for;
use crate::observers::{
    CompetenceObserver, DomainSignals, GradientObserver, MemoryObserver, MemoryStats,
    PatternEntry, PatternMetrics, PatternObserver, ScarEntry, ScarObserver,
};
use crate::parser::{self, TurnContext};
use crate::pipeline::{ChatMessage, Pipeline};
use crate::prompt;
use crate::store;

#[derive(Parser, Debug)]
#[command(name = "multicomp")]
#[command(version)]
#[command(about = "Turn every agent response into one observation and fan it out to cognitive observers")]
pub struct Args {
    /// Workspace root holding the observer stores
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// TOML config file (workspace, minimal_prompt, streak_mode, reload_between_turns)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Summarize the persisted observer state of a workspace (read-only)
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Decode the observation block of a response (file or stdin) and print it as JSON
    Parse {
        /// File holding the assistant response; stdin when omitted
        input: Option<PathBuf>,

        /// User message the response answers, for the word count
        #[arg(long, default_value = "")]
        user: String,

        /// Memory chunks that were in context
        #[arg(long, default_value = "0")]
        chunks: u64,
    },
    /// Print a response (file or stdin) with the observation block removed
    Redact {
        input: Option<PathBuf>,
    },
    /// Print the observation protocol prompt
    Prompt {
        #[arg(long)]
        minimal: bool,
    },
    /// Feed a JSONL transcript of turns through the pipeline into the workspace
    Replay {
        /// One `{"session_id", "success", "messages"}` object per line
        transcript: PathBuf,
    },
}

impl Args {
    /// Load the config file if one was given; defaults otherwise.
    pub fn load_config(&self) -> Result<PipelineConfig, crate::error::ConfigError> {
        match &self.config {
            Some(path) => PipelineConfig::load(path),
            None => Ok(PipelineConfig::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Workspace report
// ---------------------------------------------------------------------------

/// Snapshot of everything the observers have persisted under a workspace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceReport {
    pub workspace: PathBuf,
    pub patterns: usize,
    pub pattern_metrics: PatternMetrics,
    pub scars: usize,
    pub domains: Vec<DomainSignals>,
    pub memory: MemoryStats,
    pub memory_utilization: f64,
    pub gradient_points: usize,
}

impl WorkspaceReport {
    /// Read every store without initializing an observer. Corrupt stores
    /// read as empty and stay where they are.
    pub async fn load(workspace: &Path) -> Result<Self, StoreError> {
        let patterns: Vec<PatternEntry> =
            store::read_json_or_default(&PatternObserver::store_path(workspace)).await?;
        let scars: Vec<ScarEntry> =
            store::read_json_or_default(&ScarObserver::store_path(workspace)).await?;
        let domains: Vec<DomainSignals> =
            store::read_json_or_default(&CompetenceObserver::store_path(workspace)).await?;
        let memory: MemoryStats =
            store::read_json_or_default(&MemoryObserver::store_path(workspace)).await?;

        let gradient_path = GradientObserver::store_path(workspace);
        let gradient_points = match tokio::fs::read_to_string(&gradient_path).await {
            Ok(text) => text.lines().filter(|l| !l.trim().is_empty()).count(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StoreError::io(gradient_path, e)),
        };

        Ok(Self {
            workspace: workspace.to_path_buf(),
            patterns: patterns.len(),
            pattern_metrics: metrics_for(&patterns),
            scars: scars.len(),
            domains,
            memory_utilization: memory.rounded_utilization(),
            memory,
            gradient_points,
        })
    }

    pub fn print(&self) {
        println!("{}", "MULTICOMP WORKSPACE".bright_cyan().bold());
        println!("{}: {}", "Workspace".bright_yellow(), self.workspace.display());
        println!(
            "{}: {} ({} active, {} high confidence, avg {:.2})",
            "Patterns".bright_yellow(),
            self.patterns,
            self.pattern_metrics.active,
            self.pattern_metrics.high_confidence,
            self.pattern_metrics.avg_confidence
        );
        println!("{}: {}", "Scars".bright_yellow(), self.scars);
        println!("{}: {}", "Competence domains".bright_yellow(), self.domains.len());
        for d in &self.domains {
            println!(
                "  {} total={} accept={} modify={} reject={} defer={} rework={} avg_cx={:.2}",
                d.domain.bright_white(),
                d.total,
                d.accept,
                d.modify,
                d.reject,
                d.defer,
                d.rework,
                d.avg_complexity
            );
        }
        println!(
            "{}: {} turns, utilization {:.2}",
            "Memory".bright_yellow(),
            self.memory.total_turns,
            self.memory_utilization
        );
        println!("{}: {}", "Gradient points".bright_yellow(), self.gradient_points);
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// One line of a replay transcript.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayTurn {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    pub messages: Vec<ChatMessage>,
}

fn default_success() -> bool {
    true
}

/// Run every turn of `transcript` through a pipeline and flush. Returns
/// `(turns, observations emitted)`.
pub async fn replay(
    config: PipelineConfig,
    workspace: &Path,
    transcript: &str,
) -> Result<(u64, u64), serde_json::Error> {
    let turns: Vec<ReplayTurn> = transcript
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;

    let mut pipeline = Pipeline::with_workspace(config, workspace);
    for turn in &turns {
        pipeline.turn_start().await;
        pipeline
            .turn_end(turn.session_id.as_deref(), &turn.messages, turn.success)
            .await;
    }
    pipeline.stop().await;
    let status = pipeline.status();
    Ok((status.turns, status.emitted))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read `input`, or all of stdin when `None`.
pub fn read_input(input: Option<&Path>) -> std::io::Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

/// JSON for a decoded response, or `null` when no observation was found.
pub fn parse_to_json(response: &str, user: &str, chunks: u64) -> serde_json::Result<String> {
    let ctx = TurnContext {
        session_id: "cli".to_string(),
        turn_number: 1,
        user_message: user.to_string(),
        assistant_response: response.to_string(),
        chunks_in_context: chunks,
    };
    serde_json::to_string_pretty(&parser::parse_observation(&ctx))
}

pub fn prompt_text(minimal: bool) -> &'static str {
    if minimal {
        prompt::observation_prompt_minimal()
    } else {
        prompt::observation_prompt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats_subcommand() {
        let args = Args::try_parse_from(["multicomp", "stats", "--json"]).unwrap();
        assert_eq!(args.command, Command::Stats { json: true });
        assert!(args.workspace.is_none());
    }

    #[test]
    fn test_global_workspace_after_subcommand() {
        let args = Args::try_parse_from(["multicomp", "redact", "--workspace", "/w"]).unwrap();
        assert_eq!(args.workspace, Some(PathBuf::from("/w")));
        assert_eq!(args.command, Command::Redact { input: None });
    }

    #[test]
    fn test_parse_subcommand_options() {
        let args =
            Args::try_parse_from(["multicomp", "parse", "resp.txt", "--user", "hi there", "--chunks", "4"])
                .unwrap();
        assert_eq!(
            args.command,
            Command::Parse {
                input: Some(PathBuf::from("resp.txt")),
                user: "hi there".to_string(),
                chunks: 4
            }
        );
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Args::try_parse_from(["multicomp"]).is_err());
    }

    #[test]
    fn test_load_config_defaults_without_file() {
        let args = Args::try_parse_from(["multicomp", "prompt"]).unwrap();
        assert_eq!(args.load_config().unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_parse_to_json() {
        let json = parse_to_json(r#"ok <obs>{"co":{"d":"code"}}</obs>"#, "two words", 2).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["competence"]["domain"], "code");
        assert_eq!(v["gradient"]["user_message_length"], 2);
        assert_eq!(v["memory"]["chunks_in_context"], 2);
        assert_eq!(parse_to_json("no block", "", 0).unwrap(), "null");
    }

    #[test]
    fn test_prompt_text() {
        assert_eq!(prompt_text(true), prompt::observation_prompt_minimal());
        assert_eq!(prompt_text(false), prompt::observation_prompt());
    }

    #[tokio::test]
    async fn test_report_on_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let r = WorkspaceReport::load(dir.path()).await.unwrap();
        assert_eq!(r.patterns, 0);
        assert_eq!(r.scars, 0);
        assert_eq!(r.gradient_points, 0);
        assert_eq!(r.memory_utilization, 0.0);
    }

    #[tokio::test]
    async fn test_replay_then_report() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = [
            r#"{"session_id":"s1","messages":[{"role":"user","content":"find it"},{"role":"assistant","content":"Found. <obs>{\"p\":{\"t\":\"search\",\"i\":\"lookup\"},\"co\":{\"d\":\"code\",\"si\":\"accept\"},\"me\":{\"cr\":1}}</obs>"}]}"#,
            "",
            r#"{"session_id":"s1","success":false,"messages":[{"role":"assistant","content":"x <obs>{}</obs>"}]}"#,
            r#"{"messages":[{"role":"assistant","content":"No block this time."}]}"#,
        ]
        .join("\n");

        let (turns, emitted) = replay(PipelineConfig::default(), dir.path(), &transcript).await.unwrap();
        assert_eq!(turns, 3);
        assert_eq!(emitted, 1);

        let r = WorkspaceReport::load(dir.path()).await.unwrap();
        assert_eq!(r.patterns, 1);
        assert_eq!(r.domains.len(), 1);
        assert_eq!(r.gradient_points, 1);
        assert_eq!(r.memory.total_turns, 1);
    }

    #[tokio::test]
    async fn test_report_leaves_corrupt_store_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = MemoryObserver::store_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"total_turns\": 3,").unwrap();

        let r = WorkspaceReport::load(dir.path()).await.unwrap();
        assert_eq!(r.memory.total_turns, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"total_turns\": 3,");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_replay_rejects_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        assert!(replay(PipelineConfig::default(), dir.path(), "{not json").await.is_err());
    }
}
