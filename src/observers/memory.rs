//! # Stage: Memory Relevance Observer
//!
//! ## Responsibility
//! Track how much of the loaded context is actually referenced, which skills
//! get used, and how often the context window feels tight.
//!
//! ## Guarantees
//! - `utilization_rate = total_chunks_referenced / total_chunks_loaded`,
//!   recomputed only while `total_chunks_loaded > 0` (0 until then)
//! - Every observation increments `total_turns` and exactly one pressure class
//! - Counters saturate at `u64::MAX` instead of wrapping
//!
//! ## NOT Responsible For
//! - Compacting or evicting memory (consumers read these stats to do that)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ObserverError;
use crate::observation::{ContextPressure, Observation};
use crate::observer::Observer;
use crate::store;

const ID: &str = "memory";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureCounts {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

impl PressureCounts {
    fn bump(&mut self, pressure: ContextPressure) {
        let slot = match pressure {
            ContextPressure::Low => &mut self.low,
            ContextPressure::Medium => &mut self.medium,
            ContextPressure::High => &mut self.high,
        };
        *slot = slot.saturating_add(1);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_turns: u64,
    pub total_chunks_loaded: u64,
    pub total_chunks_referenced: u64,
    pub utilization_rate: f64,
    pub skill_usage: BTreeMap<String, u64>,
    pub pressure_counts: PressureCounts,
}

impl MemoryStats {
    pub fn record(&mut self, observation: &Observation) {
        let m = &observation.memory;
        self.total_turns = self.total_turns.saturating_add(1);
        self.total_chunks_loaded = self.total_chunks_loaded.saturating_add(m.chunks_in_context);
        self.total_chunks_referenced =
            self.total_chunks_referenced.saturating_add(m.chunks_referenced);
        if self.total_chunks_loaded > 0 {
            self.utilization_rate =
                self.total_chunks_referenced as f64 / self.total_chunks_loaded as f64;
        }
        for skill in &m.skills_used {
            let uses = self.skill_usage.entry(skill.clone()).or_insert(0);
            *uses = uses.saturating_add(1);
        }
        self.pressure_counts.bump(m.context_pressure);
    }

    /// Utilization rounded to two decimals.
    pub fn rounded_utilization(&self) -> f64 {
        (self.utilization_rate * 100.0).round() / 100.0
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    path: Option<PathBuf>,
    stats: MemoryStats,
    dirty: bool,
}

#[derive(Debug, Default)]
pub struct MemoryObserver {
    state: Mutex<MemoryState>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_path(workspace: &Path) -> PathBuf {
        workspace.join("analytics").join("memory-stats.json")
    }

    pub async fn stats(&self) -> MemoryStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn utilization_rate(&self) -> f64 {
        self.state.lock().await.stats.rounded_utilization()
    }
}

#[async_trait]
impl Observer for MemoryObserver {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Memory Relevance Observer"
    }

    async fn initialize(&self, workspace: &Path) -> Result<(), ObserverError> {
        let path = Self::store_path(workspace);
        let stats: MemoryStats = store::load_json_or_default(&path).await?;
        *self.state.lock().await = MemoryState {
            path: Some(path),
            stats,
            dirty: false,
        };
        Ok(())
    }

    async fn observe(&self, observation: &Observation) -> Result<(), ObserverError> {
        let mut state = self.state.lock().await;
        if state.path.is_none() {
            return Err(ObserverError::NotInitialized(ID));
        }
        state.stats.record(observation);
        state.dirty = true;
        tracing::trace!(
            target: "multicomp::observers::memory",
            turns = state.stats.total_turns,
            utilization = state.stats.utilization_rate,
            "memory stats updated"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ObserverError> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        let path = state.path.clone().ok_or(ObserverError::NotInitialized(ID))?;
        store::save_json(&path, &state.stats).await?;
        state.dirty = false;
        Ok(())
    }
}
