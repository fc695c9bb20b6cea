//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Engine exited cleanly but wrote no output: {0}")]
    OutputMissing(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Required asset missing: {0}")]
    MissingAsset(String),

    #[error("Path escapes the media root: {0}")]
    PathOutsideRoot(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Failure of one engine invocation. Counts as a failed attempt and may
    /// succeed on retry.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            MediaError::FfmpegNotFound
                | MediaError::FfmpegFailed { .. }
                | MediaError::OutputMissing(_)
                | MediaError::FileNotFound(_)
                | MediaError::Timeout(_)
                | MediaError::Io(_)
        )
    }

    /// Short reason suitable for `last_error` on a job.
    pub fn reason(&self) -> String {
        match self {
            MediaError::FfmpegFailed {
                stderr: Some(stderr),
                exit_code,
                ..
            } if !stderr.trim().is_empty() => {
                let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
                format!(
                    "ffmpeg exited with {}: {}",
                    exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    last.unwrap_or_default().trim()
                )
            }
            other => other.to_string(),
        }
    }
}
