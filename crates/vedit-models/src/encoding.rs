//! Encoding defaults shared by the parameter models and the command builders.

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Video/audio codecs used for WebM output
pub const WEBM_VIDEO_CODEC: &str = "libvpx-vp9";
pub const WEBM_AUDIO_CODEC: &str = "libopus";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF for the export stage
pub const DEFAULT_EXPORT_CRF: u8 = 24;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Extension of every intermediate video artifact
pub const VIDEO_EXTENSION: &str = "mp4";
/// Extension of thumbnail artifacts
pub const THUMBNAIL_EXTENSION: &str = "jpg";

/// Cut window
pub const DEFAULT_CUT_START_SECS: f64 = 2.0;
pub const DEFAULT_CUT_DURATION_SECS: f64 = 5.0;

/// Compression target
pub const DEFAULT_COMPRESSION_TARGET_MB: u32 = 10;
pub const DEFAULT_COMPRESSION_DURATION_SECS: u32 = 60;
/// Lowest video bitrate a compression target may work out to, in kbit/s
pub const MIN_COMPRESSION_BITRATE_KBPS: u64 = 64;

/// Thumbnail generation settings
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 480;
pub const DEFAULT_THUMBNAIL_TIMESTAMP_SECS: f64 = 2.0;

/// Watermark offset from the top-left corner, in pixels
pub const WATERMARK_OFFSET: u32 = 10;
