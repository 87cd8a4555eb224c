//! # Stage: Scar Registry Observer
//!
//! ## Responsibility
//! Record failure events ("scars") reported by the generator, grouped by
//! (category, type), and keep a human-readable log of every occurrence.
//!
//! ## Guarantees
//! - Only triggered scars with a non-empty description are recorded
//! - `confidence` is `min(0.9, 0.3 + occurrences * 0.15)` after a repeat and
//!   0.3 for a first occurrence
//! - Every recorded event is appended to the Markdown log immediately; the
//!   structured store is flushed at shutdown, only when dirty
//!
//! ## NOT Responsible For
//! - Deciding whether the reported failure really happened

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ObserverError;
use crate::observation::Observation;
use crate::observer::Observer;
use crate::store;

const ID: &str = "scar";
const UNKNOWN: &str = "unknown";

/// Header written when the Markdown log is first created.
pub const LOG_HEADER: &str = "# Scar Observations\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScarEntry {
    pub id: String,
    /// Day of first occurrence, `YYYY-MM-DD`.
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Description from the first occurrence.
    pub description: String,
    pub category: String,
    pub confidence: f64,
    pub occurrences: u64,
    pub last_triggered: String,
}

pub fn scar_confidence(occurrences: u64) -> f64 {
    (0.3 + occurrences as f64 * 0.15).min(0.9)
}

#[derive(Debug, Default)]
struct ScarState {
    dir: Option<PathBuf>,
    entries: Vec<ScarEntry>,
    dirty: bool,
}

#[derive(Debug, Default)]
pub struct ScarObserver {
    state: Mutex<ScarState>,
}

impl ScarObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_path(workspace: &Path) -> PathBuf {
        workspace.join("scars").join("observations.json")
    }

    pub fn log_path(workspace: &Path) -> PathBuf {
        workspace.join("scars").join("observation-log.md")
    }

    pub async fn entries(&self) -> Vec<ScarEntry> {
        self.state.lock().await.entries.clone()
    }
}

#[async_trait]
impl Observer for ScarObserver {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Scar Registry Observer"
    }

    async fn initialize(&self, workspace: &Path) -> Result<(), ObserverError> {
        let entries: Vec<ScarEntry> = store::load_json_or_default(&Self::store_path(workspace)).await?;
        let mut state = self.state.lock().await;
        *state = ScarState {
            dir: Some(workspace.to_path_buf()),
            entries,
            dirty: false,
        };
        Ok(())
    }

    async fn observe(&self, observation: &Observation) -> Result<(), ObserverError> {
        let obs = &observation.scar;
        let description = match obs.description.as_deref().map(str::trim) {
            Some(d) if obs.triggered && !d.is_empty() => d,
            _ => return Ok(()),
        };

        let mut state = self.state.lock().await;
        let workspace = state.dir.clone().ok_or(ObserverError::NotInitialized(ID))?;

        let category = obs.category.map_or(UNKNOWN, |c| c.as_str());
        let kind = obs.kind.map_or(UNKNOWN, |k| k.as_str());
        let timestamp = observation.timestamp_string();

        match state
            .entries
            .iter()
            .position(|e| e.category == category && e.kind == kind)
        {
            Some(idx) => {
                let entry = &mut state.entries[idx];
                entry.occurrences += 1;
                entry.last_triggered = timestamp.clone();
                entry.confidence = scar_confidence(entry.occurrences);
            }
            None => state.entries.push(ScarEntry {
                id: format!("scar-{category}-{}", uuid::Uuid::new_v4()),
                date: observation.date_string(),
                kind: kind.to_string(),
                description: description.to_string(),
                category: category.to_string(),
                confidence: 0.3,
                occurrences: 1,
                last_triggered: timestamp.clone(),
            }),
        }
        state.dirty = true;

        tracing::info!(
            target: "multicomp::observers::scar",
            kind,
            category,
            "scar recorded"
        );

        let line = format!("[{timestamp}] {kind}: {description} ({category})");
        store::append_with_header(&Self::log_path(&workspace), Some(LOG_HEADER), &line).await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ObserverError> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        let workspace = state.dir.clone().ok_or(ObserverError::NotInitialized(ID))?;
        store::save_json(&Self::store_path(&workspace), &state.entries).await?;
        state.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{ScarCategory, ScarKind};
    use crate::testing::ObservationBuilder;
    use chrono::{TimeZone, Utc};

    async fn ready() -> (tempfile::TempDir, ScarObserver) {
        let dir = tempfile::tempdir().unwrap();
        let obs = ScarObserver::new();
        obs.initialize(dir.path()).await.unwrap();
        (dir, obs)
    }

    #[test]
    fn test_confidence_progression() {
        assert!((scar_confidence(2) - 0.6).abs() < 1e-12);
        assert!((scar_confidence(3) - 0.75).abs() < 1e-12);
        assert_eq!(scar_confidence(4), 0.9);
        assert_eq!(scar_confidence(40), 0.9);
    }

    #[tokio::test]
    async fn test_untriggered_is_ignored() {
        let (dir, obs) = ready().await;
        obs.observe(&ObservationBuilder::new().build()).await.unwrap();
        obs.shutdown().await.unwrap();
        assert!(obs.entries().await.is_empty());
        assert!(!ScarObserver::store_path(dir.path()).exists());
        assert!(!ScarObserver::log_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_blank_description_is_ignored() {
        let (_dir, obs) = ready().await;
        let o = ObservationBuilder::new()
            .scar(Some(ScarKind::ToolError), Some(ScarCategory::Assumption), "   ")
            .build();
        obs.observe(&o).await.unwrap();
        assert!(obs.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_and_repeat_occurrence() {
        let (dir, obs) = ready().await;
        let ts = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        let first = ObservationBuilder::new()
            .at(ts)
            .scar(Some(ScarKind::UserCorrection), Some(ScarCategory::WrongFraming), "misread the ask")
            .build();
        obs.observe(&first).await.unwrap();

        let e = obs.entries().await.remove(0);
        assert_eq!(e.date, "2026-05-06");
        assert_eq!(e.kind, "user_correction");
        assert_eq!(e.category, "wrong_framing");
        assert_eq!(e.confidence, 0.3);
        assert!(e.id.starts_with("scar-wrong_framing-"));

        let again = ObservationBuilder::new()
            .scar(Some(ScarKind::UserCorrection), Some(ScarCategory::WrongFraming), "different words")
            .build();
        obs.observe(&again).await.unwrap();
        let e = obs.entries().await.remove(0);
        assert_eq!(e.occurrences, 2);
        assert!((e.confidence - 0.6).abs() < 1e-12);
        assert_eq!(e.description, "misread the ask");

        let log = tokio::fs::read_to_string(ScarObserver::log_path(dir.path())).await.unwrap();
        assert!(log.starts_with(LOG_HEADER));
        assert!(log.contains("[2026-05-06T07:08:09.000Z] user_correction: misread the ask (wrong_framing)\n"));
        assert_eq!(log.lines().filter(|l| l.starts_with('[')).count(), 2);
    }

    #[tokio::test]
    async fn test_missing_type_and_category_use_unknown() {
        let (_dir, obs) = ready().await;
        let o = ObservationBuilder::new().scar(None, None, "vague failure").build();
        obs.observe(&o).await.unwrap();
        obs.observe(&o).await.unwrap();
        let entries = obs.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, "unknown");
        assert_eq!(entries[0].category, "unknown");
        assert_eq!(entries[0].occurrences, 2);
    }

    #[tokio::test]
    async fn test_persisted_type_field_name() {
        let (dir, obs) = ready().await;
        let o = ObservationBuilder::new()
            .scar(Some(ScarKind::SelfCatch), Some(ScarCategory::Overconfidence), "caught it")
            .build();
        obs.observe(&o).await.unwrap();
        obs.shutdown().await.unwrap();
        let raw = tokio::fs::read_to_string(ScarObserver::store_path(dir.path())).await.unwrap();
        assert!(raw.contains("\"type\": \"self_catch\""), "{raw}");
    }
}
