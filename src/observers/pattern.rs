//! # Stage: Pattern Cache Observer
//!
//! ## Responsibility
//! Learn which (intent, tool) pairs recur and how confidently they can be
//! predicted, from the pattern sub-observation of every tool-bearing turn.
//!
//! ## Guarantees
//! - Pure-text turns (no tool) leave the cache untouched
//! - At most one entry per (intent, tool); at most [`MAX_EXAMPLES`] distinct
//!   parameter signatures per entry
//! - `confidence` stays in [0, 0.99] and never decreases while an entry keeps
//!   being observed in lifetime mode
//! - Flushes only when something changed since the last load
//!
//! ## NOT Responsible For
//! - Firing or correcting patterns (`times_fired` / `times_corrected` are
//!   carried for the consumer that does)

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::StreakMode;
use crate::error::ObserverError;
use crate::observation::Observation;
use crate::observer::Observer;
use crate::store;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Distinct parameter signatures kept per entry.
pub const MAX_EXAMPLES: usize = 10;
/// Upper bound on `confidence`.
pub const MAX_CONFIDENCE: f64 = 0.99;
/// Entries above this confidence count as active.
pub const ACTIVE_THRESHOLD: f64 = 0.1;
/// Active entries above this confidence count as high-confidence.
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.85;

const ID: &str = "pattern";
const STORE_PATH: [&str; 2] = ["patterns", "cache.json"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub id: String,
    pub intent: String,
    pub tool: String,
    pub param_keys: Vec<String>,
    /// Canonical JSON of each distinct parameter map seen.
    pub examples: Vec<String>,
    pub times_observed: u64,
    pub times_fired: u64,
    pub times_corrected: u64,
    pub confidence: f64,
    pub last_observed: String,
    pub streak: u64,
}

/// Summary over the cache for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PatternMetrics {
    pub active: usize,
    pub high_confidence: usize,
    /// Mean over active entries, rounded to two decimals.
    pub avg_confidence: f64,
}

/// `min(0.99, n/(n+10) + 0.05 * min(streak, 5) * 0.02)`
pub fn pattern_confidence(times_observed: u64, streak: u64) -> f64 {
    let n = times_observed as f64;
    let base = n / (n + 10.0);
    let streak_bonus = streak.min(5) as f64 * 0.02;
    (base + 0.05 * streak_bonus).min(MAX_CONFIDENCE)
}

/// Compute [`PatternMetrics`] over a slice of entries.
pub fn metrics_for(entries: &[PatternEntry]) -> PatternMetrics {
    let active: Vec<f64> = entries
        .iter()
        .map(|e| e.confidence)
        .filter(|c| *c > ACTIVE_THRESHOLD)
        .collect();
    if active.is_empty() {
        return PatternMetrics::default();
    }
    let avg = active.iter().sum::<f64>() / active.len() as f64;
    PatternMetrics {
        active: active.len(),
        high_confidence: active.iter().filter(|c| **c > HIGH_CONFIDENCE_THRESHOLD).count(),
        avg_confidence: (avg * 100.0).round() / 100.0,
    }
}

#[derive(Debug, Default)]
struct PatternState {
    path: Option<PathBuf>,
    entries: Vec<PatternEntry>,
    dirty: bool,
}

// ---------------------------------------------------------------------------
// PatternObserver
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PatternObserver {
    streak_mode: StreakMode,
    state: Mutex<PatternState>,
}

impl PatternObserver {
    pub fn new(streak_mode: StreakMode) -> Self {
        Self {
            streak_mode,
            state: Mutex::new(PatternState::default()),
        }
    }

    pub fn store_path(workspace: &Path) -> PathBuf {
        STORE_PATH.iter().fold(workspace.to_path_buf(), |p, s| p.join(s))
    }

    /// Snapshot of the current cache.
    pub async fn patterns(&self) -> Vec<PatternEntry> {
        self.state.lock().await.entries.clone()
    }

    pub async fn metrics(&self) -> PatternMetrics {
        metrics_for(&self.state.lock().await.entries)
    }
}

#[async_trait]
impl Observer for PatternObserver {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Pattern Cache Observer"
    }

    async fn initialize(&self, workspace: &Path) -> Result<(), ObserverError> {
        let path = Self::store_path(workspace);
        let entries: Vec<PatternEntry> = store::load_json_or_default(&path).await?;
        tracing::debug!(
            target: "multicomp::observers::pattern",
            entries = entries.len(),
            "pattern cache loaded"
        );
        let mut state = self.state.lock().await;
        *state = PatternState {
            path: Some(path),
            entries,
            dirty: false,
        };
        Ok(())
    }

    async fn observe(&self, observation: &Observation) -> Result<(), ObserverError> {
        let obs = &observation.pattern;
        let Some(tool) = obs.tool_used.as_deref() else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if state.path.is_none() {
            return Err(ObserverError::NotInitialized(ID));
        }

        let signature = serde_json::to_string(&obs.parameters).map_err(crate::error::StoreError::from)?;
        let timestamp = observation.timestamp_string();
        let hit = state
            .entries
            .iter()
            .position(|e| e.intent == obs.intent && e.tool == tool);

        if self.streak_mode == StreakMode::Consecutive {
            for (idx, entry) in state.entries.iter_mut().enumerate() {
                if Some(idx) != hit {
                    entry.streak = 0;
                }
            }
        }

        match hit {
            Some(idx) => {
                let entry = &mut state.entries[idx];
                entry.times_observed += 1;
                entry.streak += 1;
                entry.last_observed = timestamp;
                entry.confidence = pattern_confidence(entry.times_observed, entry.streak);
                if entry.examples.len() < MAX_EXAMPLES && !entry.examples.contains(&signature) {
                    entry.examples.push(signature);
                }
                tracing::debug!(
                    target: "multicomp::observers::pattern",
                    pattern = %entry.id,
                    observed = entry.times_observed,
                    confidence = entry.confidence,
                    "pattern reinforced"
                );
            }
            None => {
                let entry = PatternEntry {
                    id: format!("{}-{}-{}", obs.intent, tool, uuid::Uuid::new_v4()),
                    intent: obs.intent.clone(),
                    tool: tool.to_string(),
                    param_keys: obs.parameters.keys().cloned().collect(),
                    examples: vec![signature],
                    times_observed: 1,
                    times_fired: 0,
                    times_corrected: 0,
                    confidence: 0.0,
                    last_observed: timestamp,
                    streak: 1,
                };
                tracing::debug!(
                    target: "multicomp::observers::pattern",
                    pattern = %entry.id,
                    "new pattern"
                );
                state.entries.push(entry);
            }
        }

        state.dirty = true;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ObserverError> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        let path = state.path.clone().ok_or(ObserverError::NotInitialized(ID))?;
        store::save_json(&path, &state.entries).await?;
        state.dirty = false;
        Ok(())
    }
}
