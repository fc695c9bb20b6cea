//! The external transcoding engine seam.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Runs one engine invocation to completion or until `timeout` elapses.
///
/// Success means exit status 0; the caller checks that the output exists.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    async fn run(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<()>;
}

/// [`TranscodeEngine`] backed by the `ffmpeg` binary.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEngine {
    runner: FfmpegRunner,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific binary instead of `ffmpeg` from PATH.
    pub fn with_binary(binary: impl Into<std::path::PathBuf>) -> Self {
        Self {
            runner: FfmpegRunner::new().with_binary(binary),
        }
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn run(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<()> {
        let output = cmd.output().display().to_string();
        self.runner
            .clone()
            .with_timeout(timeout)
            .run_with_progress(cmd, move |progress| {
                debug!(
                    output = %output,
                    out_time_ms = progress.out_time_ms,
                    frame = progress.frame,
                    speed = progress.speed,
                    complete = progress.is_complete,
                    "ffmpeg progress"
                );
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_success_and_failure() {
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");
        FfmpegEngine::with_binary("true")
            .run(&cmd, Duration::from_secs(5))
            .await
            .unwrap();

        let err = FfmpegEngine::with_binary("false")
            .run(&cmd, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FfmpegFailed { .. }));
        assert!(err.is_engine_failure());
    }
}
