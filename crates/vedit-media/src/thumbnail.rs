//! Thumbnail extraction.

use std::path::Path;

use vedit_models::ThumbnailParams;

use crate::command::FfmpegCommand;
use crate::filters::filter_thumbnail;

/// Single scaled frame at the requested timestamp.
pub fn thumbnail_command(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    params: &ThumbnailParams,
) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .seek(params.timestamp_secs)
        .single_frame()
        .video_filter(filter_thumbnail(params.width))
}
