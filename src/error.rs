//! Error handling module
//!
//! Unified error taxonomy for the synchronization engine. Every error is
//! object-scoped: nothing here aborts synchronization of sibling objects or
//! sibling targets, and nothing is retried automatically.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Raw driver error from the relational adapter.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Failure to establish or keep a backend connection. Fatal for that one
    /// backend only; other targets continue.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A candidate statement was rejected by the test gate. The target is
    /// unchanged and no log entry was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Apply failed after validation succeeded. The object is skipped and no
    /// log entry is written; the target may be in an inconsistent state.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Apply succeeded but the sync log could not be written. The change is
    /// now permanently unrollback-able, so this is the highest severity.
    #[error("Failed to write sync log entry: {0}")]
    LogWrite(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not meaningful for this backend family. Reported,
    /// never silently ignored.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias used throughout the engine.
pub type SyncResult<T> = Result<T, SyncError>;
