//! # Stage: User Competence Observer
//!
//! ## Responsibility
//! Count how the user responds (accept / modify / reject / defer / rework)
//! per domain, with a running mean of the reported task complexity.
//!
//! ## Guarantees
//! - Turns without a signal or with a blank domain are ignored
//! - Per domain, the signal counters sum to at most `total`
//! - `avg_complexity` is the exact running mean over `total` samples
//! - Domains keep first-seen order on disk
//!
//! ## NOT Responsible For
//! - Turning counts into a competence score

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ObserverError;
use crate::observation::{Observation, UserSignal};
use crate::observer::Observer;
use crate::store;

const ID: &str = "competence";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSignals {
    pub domain: String,
    pub accept: u64,
    pub modify: u64,
    pub reject: u64,
    pub defer: u64,
    pub rework: u64,
    pub total: u64,
    pub avg_complexity: f64,
    /// Timestamp of the most recent signal in this domain.
    pub last_signal: String,
}

impl DomainSignals {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            accept: 0,
            modify: 0,
            reject: 0,
            defer: 0,
            rework: 0,
            total: 0,
            avg_complexity: 0.0,
            last_signal: String::new(),
        }
    }

    /// Fold one signal in.
    pub fn record(&mut self, signal: UserSignal, complexity: f64, timestamp: String) {
        let counter = match signal {
            UserSignal::Accept => &mut self.accept,
            UserSignal::Modify => &mut self.modify,
            UserSignal::Reject => &mut self.reject,
            UserSignal::Defer => &mut self.defer,
            UserSignal::Rework => &mut self.rework,
        };
        *counter += 1;
        self.total += 1;
        self.last_signal = timestamp;
        let n = self.total as f64;
        self.avg_complexity = (self.avg_complexity * (n - 1.0) + complexity) / n;
    }

    pub fn signal_sum(&self) -> u64 {
        self.accept + self.modify + self.reject + self.defer + self.rework
    }
}

#[derive(Debug, Default)]
struct CompetenceState {
    path: Option<PathBuf>,
    domains: Vec<DomainSignals>,
    dirty: bool,
}

#[derive(Debug, Default)]
pub struct CompetenceObserver {
    state: Mutex<CompetenceState>,
}

impl CompetenceObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_path(workspace: &Path) -> PathBuf {
        workspace.join("analytics").join("competence").join("signals.json")
    }

    pub async fn domains(&self) -> Vec<DomainSignals> {
        self.state.lock().await.domains.clone()
    }
}

#[async_trait]
impl Observer for CompetenceObserver {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "User Competence Observer"
    }

    async fn initialize(&self, workspace: &Path) -> Result<(), ObserverError> {
        let path = Self::store_path(workspace);
        let domains: Vec<DomainSignals> = store::load_json_or_default(&path).await?;
        *self.state.lock().await = CompetenceState {
            path: Some(path),
            domains,
            dirty: false,
        };
        Ok(())
    }

    async fn observe(&self, observation: &Observation) -> Result<(), ObserverError> {
        let obs = &observation.competence;
        let Some(signal) = obs.signal else {
            return Ok(());
        };
        let domain = obs.domain.trim();
        if domain.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        if state.path.is_none() {
            return Err(ObserverError::NotInitialized(ID));
        }

        let idx = match state.domains.iter().position(|d| d.domain == domain) {
            Some(i) => i,
            None => {
                state.domains.push(DomainSignals::new(domain));
                state.domains.len() - 1
            }
        };
        let record = &mut state.domains[idx];
        record.record(signal, obs.complexity, observation.timestamp_string());
        tracing::debug!(
            target: "multicomp::observers::competence",
            domain,
            %signal,
            total = record.total,
            avg_complexity = record.avg_complexity,
            "competence signal recorded"
        );
        state.dirty = true;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ObserverError> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        let path = state.path.clone().ok_or(ObserverError::NotInitialized(ID))?;
        store::save_json(&path, &state.domains).await?;
        state.dirty = false;
        Ok(())
    }
}
