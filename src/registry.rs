//! # Stage: Observer Registry
//!
//! ## Responsibility
//! Own the set of observers, sequence their lifecycle against one workspace,
//! and fan every [`Observation`] out to all of them concurrently.
//!
//! ## Guarantees
//! - Isolation: an error or panic in one observer is logged and counted; the
//!   others still run to completion
//! - All-settled: `emit` returns only after every observer task has finished
//! - Ordering: lifecycle calls run in registration order; re-registering an
//!   id keeps the original position
//!
//! ## NOT Responsible For
//! - Timeouts or cancellation of observer calls
//! - Parsing (that is [`crate::parser`])

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::ObserverError;
use crate::observation::Observation;
use crate::observer::Observer;

// ---------------------------------------------------------------------------
// EmitReport
// ---------------------------------------------------------------------------

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub delivered: usize,
    pub failed: usize,
}

impl std::fmt::Display for EmitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} delivered, {} failed", self.delivered, self.failed)
    }
}

// ---------------------------------------------------------------------------
// ObserverRegistry
// ---------------------------------------------------------------------------

/// Ordered collection of observers bound to a workspace root.
pub struct ObserverRegistry {
    workspace: PathBuf,
    observers: Vec<Arc<dyn Observer>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("workspace", &self.workspace)
            .field("observers", &self.ids())
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            observers: Vec::new(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Add an observer. An observer with the same id is replaced in place.
    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        let id = observer.id();
        match self.observers.iter().position(|o| o.id() == id) {
            Some(idx) => {
                tracing::warn!(
                    target: "multicomp::registry",
                    observer = id,
                    "observer already registered; replacing"
                );
                self.observers[idx] = observer;
            }
            None => {
                tracing::debug!(
                    target: "multicomp::registry",
                    observer = id,
                    name = observer.name(),
                    "observer registered"
                );
                self.observers.push(observer);
            }
        }
    }

    /// Remove the observer with `id`. Returns it if it was registered.
    pub fn unregister(&mut self, id: &str) -> Option<Arc<dyn Observer>> {
        let idx = self.observers.iter().position(|o| o.id() == id)?;
        tracing::debug!(target: "multicomp::registry", observer = id, "observer unregistered");
        Some(self.observers.remove(idx))
    }

    pub fn count(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<&'static str> {
        self.observers.iter().map(|o| o.id()).collect()
    }

    /// `(id, name)` pairs in registration order.
    pub fn describe(&self) -> Vec<(&'static str, &'static str)> {
        self.observers.iter().map(|o| (o.id(), o.name())).collect()
    }

    /// Initialize every observer in turn. Returns how many succeeded.
    pub async fn initialize_all(&self) -> usize {
        let mut ok = 0;
        for observer in &self.observers {
            match observer.initialize(&self.workspace).await {
                Ok(()) => ok += 1,
                Err(err) => log_failure(observer.id(), "initialize", &err),
            }
        }
        tracing::debug!(
            target: "multicomp::registry",
            initialized = ok,
            total = self.observers.len(),
            workspace = %self.workspace.display(),
            "initialize_all complete"
        );
        ok
    }

    /// Deliver `observation` to every observer concurrently and wait for all
    /// of them to settle.
    pub async fn emit(&self, observation: Arc<Observation>) -> EmitReport {
        let mut set = JoinSet::new();
        for observer in &self.observers {
            let observer = Arc::clone(observer);
            let observation = Arc::clone(&observation);
            set.spawn(async move {
                let id = observer.id();
                // Inner task so a panic surfaces with the observer's id.
                let outcome = tokio::spawn(async move { observer.observe(&observation).await })
                    .await
                    .unwrap_or_else(|join_err| {
                        Err(ObserverError::Task {
                            id: id.to_string(),
                            detail: join_err.to_string(),
                        })
                    });
                (id, outcome)
            });
        }

        let mut report = EmitReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((id, Err(err))) => {
                    report.failed += 1;
                    log_failure(id, "observe", &err);
                }
                Err(join_err) => {
                    report.failed += 1;
                    tracing::error!(
                        target: "multicomp::registry",
                        error = %join_err,
                        "fan-out task failed"
                    );
                }
            }
        }

        tracing::debug!(
            target: "multicomp::registry",
            session = %observation.session_id,
            turn = observation.turn_number,
            delivered = report.delivered,
            failed = report.failed,
            "observation emitted"
        );
        report
    }

    /// Shut every observer down in turn. Returns how many succeeded.
    pub async fn shutdown_all(&self) -> usize {
        let mut ok = 0;
        for observer in &self.observers {
            match observer.shutdown().await {
                Ok(()) => ok += 1,
                Err(err) => log_failure(observer.id(), "shutdown", &err),
            }
        }
        ok
    }
}

fn log_failure(id: &str, phase: &'static str, err: &ObserverError) {
    tracing::error!(
        target: "multicomp::registry",
        observer = id,
        phase,
        error = %err,
        "observer call failed"
    );
}
