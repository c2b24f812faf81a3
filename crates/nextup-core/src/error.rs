//! Core error types for nextup-core.
//!
//! One `CoreError` enum with `#[from]` conversions for the per-concern
//! sub-errors. Every mutation that fails with one of these leaves the
//! store in its pre-operation state.

use std::path::PathBuf;
use thiserror::Error;

use crate::task::{TaskId, TaskTransitionError};

/// Core error type for nextup-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Bad caller input; never retried
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Dependency mutation rejected; graph unchanged
    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    /// Lifecycle mutation rejected; task unchanged
    #[error(transparent)]
    InvalidTransition(#[from] TaskTransitionError),

    /// Another writer changed the task between read and write
    #[error("Concurrent modification of task {task_id}")]
    ConcurrencyConflict { task_id: TaskId },

    /// Unknown task id
    #[error("Task {0} not found")]
    NotFound(TaskId),

    /// A resurfacing job failed; only ever logged by the scheduler loop
    #[error("Scheduler job '{job}' failed: {message}")]
    SchedulerJob { job: String, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored value could not be decoded
    #[error("Corrupt value in column '{column}': {value}")]
    CorruptValue { column: &'static str, value: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    MissingKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A field required by the requested operation was not supplied
    #[error("Missing required field '{field}' for {operation}")]
    MissingField {
        field: &'static str,
        operation: &'static str,
    },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// No comparison session is open
    #[error("No comparison is pending")]
    NoPendingComparison,

    /// Submitted pair does not match the open session
    #[error("Comparison result ({winner} vs {loser}) does not match pending pair ({a}, {b})")]
    ComparisonMismatch {
        winner: TaskId,
        loser: TaskId,
        a: TaskId,
        b: TaskId,
    },

    /// Unknown resurfacing job name
    #[error("Unknown job '{0}'")]
    UnknownJob(String),
}

/// Dependency graph errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// The edge would close a cycle
    #[error("Adding {blocked} <- {blocking} would create a cycle")]
    Cycle { blocked: TaskId, blocking: TaskId },

    /// A task cannot block itself
    #[error("Task {0} cannot block itself")]
    SelfEdge(TaskId),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked
                    || inner.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl CoreError {
    /// True for the foreground/background race the engine retries once.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict { .. })
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
