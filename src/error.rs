#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskdeckError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("no task found matching: {0}")]
    TaskNotFound(String),

    #[error("multiple tasks match '{pattern}': {count} matches")]
    AmbiguousTask { pattern: String, count: usize },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

/// Failures raised by a key-value backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("storage io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// For backends without a local path, e.g. a remote or read-only store.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures raised by [`crate::task::store::TaskStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("stored tasks under key '{key}' are corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode tasks: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("a task with id '{0}' already exists")]
    DuplicateId(String),

    #[error("no task with id '{0}'")]
    NotFound(String),
}

impl StoreError {
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
