//! FFmpeg CLI adapter for the vedit stages.
//!
//! Stage commands are built as argument vectors by [`build_stage_command`]
//! and run through the [`TranscodeEngine`] seam.

pub mod command;
pub mod engine;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod stages;
pub mod thumbnail;
pub mod watermark;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use engine::{FfmpegEngine, TranscodeEngine};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{partial_path, publish_output, remove_dir_best_effort, resolve_under_root};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use stages::{build_stage_command, StageAssets};
pub use watermark::{WatermarkConfig, DEFAULT_WATERMARK_PATH};
