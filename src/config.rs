//! Pipeline configuration, loaded from TOML.
//!
//! ```toml
//! workspace = "/home/me/.multicomp/workspace"
//! minimal_prompt = false
//! streak_mode = "lifetime"      # or "consecutive"
//! reload_between_turns = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable that overrides the default workspace location.
pub const WORKSPACE_ENV: &str = "MULTICOMP_WORKSPACE";

/// How the pattern observer counts a streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakMode {
    /// Streak only ever grows while an entry is observed.
    #[default]
    Lifetime,
    /// A tool-bearing turn on a different (intent, tool) resets every other
    /// entry's streak to zero.
    Consecutive,
}

impl std::fmt::Display for StreakMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreakMode::Lifetime => write!(f, "lifetime"),
            StreakMode::Consecutive => write!(f, "consecutive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Storage root; resolved by [`PipelineConfig::resolve_workspace`] when unset.
    pub workspace: Option<PathBuf>,
    /// Return the compact protocol prompt at turn start.
    pub minimal_prompt: bool,
    pub streak_mode: StreakMode,
    /// Flush and reload every observer after each emitted observation.
    pub reload_between_turns: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            minimal_prompt: false,
            streak_mode: StreakMode::Lifetime,
            reload_between_turns: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Pick the workspace root: `explicit`, then the configured value, then
    /// `$MULTICOMP_WORKSPACE`, then `$HOME/.multicomp/workspace`, and finally
    /// `./.multicomp/workspace` when no home directory is known.
    pub fn resolve_workspace(&self, explicit: Option<&Path>) -> PathBuf {
        resolve_with(
            explicit,
            self.workspace.as_deref(),
            std::env::var_os(WORKSPACE_ENV).map(PathBuf::from),
            std::env::var_os("HOME").map(PathBuf::from),
        )
    }
}

fn resolve_with(
    explicit: Option<&Path>,
    configured: Option<&Path>,
    env: Option<PathBuf>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(p) = explicit.or(configured) {
        return p.to_path_buf();
    }
    if let Some(p) = env.filter(|p| !p.as_os_str().is_empty()) {
        return p;
    }
    home.unwrap_or_else(|| PathBuf::from("."))
        .join(".multicomp")
        .join("workspace")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.workspace, None);
        assert!(!c.minimal_prompt);
        assert_eq!(c.streak_mode, StreakMode::Lifetime);
        assert!(c.reload_between_turns);
    }

    #[test]
    fn test_from_toml_partial_fills_defaults() {
        let c = PipelineConfig::from_toml_str("streak_mode = \"consecutive\"\n").unwrap();
        assert_eq!(c.streak_mode, StreakMode::Consecutive);
        assert!(c.reload_between_turns);
    }

    #[test]
    fn test_from_toml_full() {
        let c = PipelineConfig::from_toml_str(
            "workspace = \"/data/ws\"\nminimal_prompt = true\nreload_between_turns = false\n",
        )
        .unwrap();
        assert_eq!(c.workspace, Some(PathBuf::from("/data/ws")));
        assert!(c.minimal_prompt);
        assert!(!c.reload_between_turns);
    }

    #[test]
    fn test_from_toml_rejects_bad_streak_mode() {
        let err = PipelineConfig::from_toml_str("streak_mode = \"forever\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = PipelineConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multicomp.toml");
        std::fs::write(&path, "minimal_prompt = true").unwrap();
        assert!(PipelineConfig::load(&path).unwrap().minimal_prompt);
    }

    #[test]
    fn test_resolve_order() {
        let explicit = PathBuf::from("/explicit");
        let configured = PathBuf::from("/configured");
        let env = Some(PathBuf::from("/env"));
        let home = Some(PathBuf::from("/home/u"));

        assert_eq!(
            resolve_with(Some(&explicit), Some(&configured), env.clone(), home.clone()),
            explicit
        );
        assert_eq!(resolve_with(None, Some(&configured), env.clone(), home.clone()), configured);
        assert_eq!(resolve_with(None, None, env, home.clone()), PathBuf::from("/env"));
        assert_eq!(
            resolve_with(None, None, None, home),
            PathBuf::from("/home/u/.multicomp/workspace")
        );
    }

    #[test]
    fn test_streak_mode_display() {
        assert_eq!(StreakMode::Consecutive.to_string(), "consecutive");
    }
}
