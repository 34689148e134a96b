// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Handler failures are *not* represented here: they travel as
//! [`StepFailure`](crate::registry::StepFailure) values inside step result
//! events. This enum covers what the engine surfaces to callers of its API.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StepgraphError {
    /// Caller supplied malformed input (e.g. missing required context keys).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A template is unusable: unknown dependency, cycle, missing handler...
    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Step '{step}' not found in task {task}")]
    StepNotFound { task: Uuid, step: String },

    /// Illegal or stale state transition. The caller should re-read the task
    /// and decide again; the engine never retries these on its own.
    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepgraphError {
    /// Whether this error is an optimistic-concurrency rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StepgraphError::ConflictError(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StepgraphError>;
