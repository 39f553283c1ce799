//! Errors - エラー型と分類
//!
//! - `TaskError`: a handler attempt failed. Never escapes the worker loop; it
//!   only travels in a `TaskEvent::Failed`.
//! - `StoreError`: the task store failed. Propagates out of `work_once`.
//! - `QueueError`: facade-level failures seen by producers and operators.

use std::fmt;

use super::TaskId;

/// ErrorKind は実行エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The handler returned an error.
    Handler,
    /// The payload could not be decoded into the handler's task type.
    Decode,
    /// The handler exceeded its configured timeout.
    Timeout,
    /// The handler panicked.
    Panic,
}

/// A failed execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    kind: ErrorKind,
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Handler, message)
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task error (kind: {:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Task store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(sqlx::Error),

    /// The row is no longer pending under our claim (terminal already, or the
    /// claim expired and somebody else took it).
    #[error("claim lost for {0}")]
    ClaimLost(TaskId),

    #[error("{0} not found")]
    NotFound(TaskId),

    /// A persisted value could not be mapped back into the domain.
    #[error("corrupt task row: {0}")]
    Corrupt(String),

    /// The database could not be reached (pool exhausted or closed, I/O).
    /// Workers back off and retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            e @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)) => {
                Self::Unavailable(e.to_string())
            }
            e => Self::Database(e),
        }
    }
}

/// Facade error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("payload encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("worker pool is already running")]
    PoolAlreadyRunning,
}
