//! Queue error types.

use thiserror::Error;
use vedit_models::StageName;

pub type QueueResult<T> = Result<T, QueueError>;

/// A queue operation could not be completed. Every variant means the
/// backend is unusable for now; callers treat them alike.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue backend unreachable: {0}")]
    ConnectionFailed(String),

    #[error("Could not add message to {stage}: {reason}")]
    EnqueueFailed { stage: StageName, reason: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Message encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(stage: StageName, reason: impl Into<String>) -> Self {
        Self::EnqueueFailed {
            stage,
            reason: reason.into(),
        }
    }
}
