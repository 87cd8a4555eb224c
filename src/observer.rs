//! The capability every observation consumer implements.
//!
//! Observers are shared across fan-out tasks as `Arc<dyn Observer>`, so every
//! method takes `&self`; each observer guards its own state with an async
//! mutex, which keeps mutations of one observer from interleaving.

use std::path::Path;

use async_trait::async_trait;

use crate::error::ObserverError;
use crate::observation::Observation;

#[async_trait]
pub trait Observer: Send + Sync {
    /// Stable identifier; the registry keys on it.
    fn id(&self) -> &'static str;

    /// Human-readable name for status output.
    fn name(&self) -> &'static str;

    /// Load persisted state from under `workspace`. Replaces any in-memory
    /// state with exactly what is on disk.
    async fn initialize(&self, _workspace: &Path) -> Result<(), ObserverError> {
        Ok(())
    }

    /// Fold one observation into the observer's model.
    async fn observe(&self, observation: &Observation) -> Result<(), ObserverError>;

    /// Flush state that changed since the last load or flush.
    async fn shutdown(&self) -> Result<(), ObserverError> {
        Ok(())
    }
}
