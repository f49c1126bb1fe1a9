//! Error types for the workflow engine.

use crate::store::Revision;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}

impl Error {
    /// True when this error is a lost optimistic-concurrency race.
    ///
    /// Conflicts are never surfaced as failures — the worker that lost
    /// simply waits for its next observation of the document.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store(StoreError::Conflict { .. }))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The conditional write targeted a stale revision. Another worker won.
    #[error("Revision conflict on document {id} (expected rev {expected})")]
    Conflict { id: String, expected: Revision },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Flow/Task catalog resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Flow not found: {key}")]
    FlowNotFound { key: String },

    #[error("Task not found: {name}")]
    TaskNotFound { name: String },

    #[error("Malformed catalog document {id}: {message}")]
    Decode { id: String, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Task runner errors.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Runner {runner} missing required param: {key}")]
    MissingParam { runner: String, key: String },

    #[error("Runner {runner} got invalid param {key}: {message}")]
    InvalidParam {
        runner: String,
        key: String,
        message: String,
    },

    #[error("Runner {runner} failed: {reason}")]
    Failed { runner: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
