//! Gradient Tracker Observer: appends one communication data point per turn
//! to a JSONL log. History is never read back; rate-of-change analysis runs
//! elsewhere over the file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ObserverError, StoreError};
use crate::observation::{InteractionType, Observation, SessionContinuity};
use crate::observer::Observer;
use crate::store;

const ID: &str = "gradient";

/// One line of `analytics/gradient-signals.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientDataPoint {
    pub timestamp: String,
    pub person: Option<String>,
    pub message_length: usize,
    pub sentiment: f64,
    pub interaction_type: InteractionType,
    pub session_continuity: SessionContinuity,
}

impl GradientDataPoint {
    pub fn from_observation(observation: &Observation) -> Self {
        let g = &observation.gradient;
        Self {
            timestamp: observation.timestamp_string(),
            person: g.person.clone(),
            message_length: g.user_message_length,
            sentiment: g.sentiment,
            interaction_type: g.interaction_type,
            session_continuity: g.session_continuity,
        }
    }
}

#[derive(Debug, Default)]
pub struct GradientObserver {
    path: Mutex<Option<PathBuf>>,
}

impl GradientObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_path(workspace: &Path) -> PathBuf {
        workspace.join("analytics").join("gradient-signals.jsonl")
    }
}

#[async_trait]
impl Observer for GradientObserver {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Gradient Tracker Observer"
    }

    async fn initialize(&self, workspace: &Path) -> Result<(), ObserverError> {
        *self.path.lock().await = Some(Self::store_path(workspace));
        Ok(())
    }

    async fn observe(&self, observation: &Observation) -> Result<(), ObserverError> {
        // Held across the write so appends from one observer never interleave.
        let guard = self.path.lock().await;
        let path = guard.as_ref().ok_or(ObserverError::NotInitialized(ID))?;
        let line = serde_json::to_string(&GradientDataPoint::from_observation(observation))
            .map_err(StoreError::from)?;
        store::append_line(path, &line).await?;
        Ok(())
    }
}
