//! Worker error types.
//!
//! Stage failures never surface here: they are recorded on the job. A
//! `WorkerError` means the worker itself cannot go on.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] vedit_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vedit_queue::QueueError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Store or queue unavailable. The message stays unacked and the
    /// process exits so a supervisor can restart it.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, WorkerError::Store(_) | WorkerError::Queue(_))
    }
}
