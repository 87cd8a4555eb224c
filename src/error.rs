//! Crate-level error types.
//!
//! None of these ever reach the conversational turn: the registry and the
//! pipeline driver convert them into log records at their boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while reading or writing an observer's durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed on `path`.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A document could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }
}

/// Failures raised by an individual observer.
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// `observe` or `shutdown` was called before `initialize` gave the
    /// observer a storage root.
    #[error("observer '{0}' used before initialize")]
    NotInitialized(&'static str),

    /// The observer task panicked or was aborted during fan-out.
    #[error("observer '{id}' task failed: {detail}")]
    Task { id: String, detail: String },
}

/// Failures while loading a [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}
