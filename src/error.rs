//! Error types for guardrail.
//!
//! Only infrastructure failures surface as errors: a snapshot directory
//! that cannot be created, a shell that cannot be spawned, a disk that
//! fills mid-restore. A command that runs and fails, times out, or gets
//! blocked is *data*, reported inside
//! [`ExecutionResult`](crate::executor::ExecutionResult), never an `Err`.

use std::path::PathBuf;

use uuid::Uuid;

/// Top-level error type for the safety core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Snapshot store errors. Any of these means the safety net itself is
/// compromised; callers must not proceed to execute without a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot directory {path} unavailable: {reason}")]
    StoreUnavailable { path: PathBuf, reason: String },

    #[error("Snapshot {id} not found")]
    NotFound { id: Uuid },

    #[error("Failed to persist snapshot {id}: {reason}")]
    Persist { id: Uuid, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executor errors. Limited to spawn-level failure: once a child process
/// exists, every outcome is encoded in the returned result instead.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Failed to spawn shell for command: {reason}")]
    SpawnFailed { reason: String },
}

/// Coordinator errors.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Violation log error: {reason}")]
    ViolationLog { reason: String },
}

/// Result type alias for the safety core.
pub type Result<T> = std::result::Result<T, Error>;
