//! Watermark overlay used by the finalize stage.
//!
//! The image is passed to ffmpeg as input 1 and composited onto the video
//! with `overlay`, offset from the top-left corner.

use std::path::{Path, PathBuf};

use tracing::debug;
use vedit_models::encoding::WATERMARK_OFFSET;

use crate::error::{MediaError, MediaResult};

/// Location of the watermark inside the container image.
pub const DEFAULT_WATERMARK_PATH: &str = "/app/assets/watermark.png";

/// Checked in order when the container path does not exist.
const LOCAL_WATERMARK_PATHS: [&str; 2] = ["./assets/watermark.png", "../assets/watermark.png"];

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkConfig {
    /// PNG with an alpha channel
    pub image_path: PathBuf,
    /// Pixels from the left and top edges
    pub offset: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            image_path: locate_watermark(),
            offset: WATERMARK_OFFSET,
        }
    }
}

impl WatermarkConfig {
    /// `WATERMARK_PATH` if set, otherwise the first existing default location.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var("WATERMARK_PATH") {
            Ok(path) if !path.trim().is_empty() => config.with_image_path(path),
            _ => config,
        }
    }

    pub fn with_image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = path.into();
        self
    }

    /// Fail with `MissingAsset` when the image is absent.
    pub fn validate(&self) -> MediaResult<()> {
        if self.image_path.is_file() {
            Ok(())
        } else {
            Err(MediaError::MissingAsset(format!(
                "watermark image not found: {}",
                self.image_path.display()
            )))
        }
    }

    /// Filter graph compositing input 1 over input 0, output label `[vout]`.
    pub fn overlay_filter(&self) -> String {
        format!("[0:v][1:v]overlay={0}:{0}[vout]", self.offset)
    }
}

fn locate_watermark() -> PathBuf {
    std::iter::once(DEFAULT_WATERMARK_PATH)
        .chain(LOCAL_WATERMARK_PATHS)
        .map(Path::new)
        .find(|path| path.exists())
        .map(|path| {
            debug!(path = %path.display(), "Using watermark image");
            path.to_path_buf()
        })
        // validate() reports the container path as missing
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WATERMARK_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_uses_fixed_offset() {
        let config = WatermarkConfig::default();
        assert_eq!(config.offset, WATERMARK_OFFSET);
        assert_eq!(
            config.overlay_filter(),
            format!("[0:v][1:v]overlay={0}:{0}[vout]", WATERMARK_OFFSET)
        );
    }

    #[test]
    fn test_missing_image_is_asset_error() {
        let config = WatermarkConfig::default().with_image_path("/nonexistent/path.png");
        assert!(matches!(config.validate(), Err(MediaError::MissingAsset(_))));
    }

    #[test]
    fn test_present_image_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let image = dir.path().join("wm.png");
        std::fs::write(&image, b"png").unwrap();
        assert!(WatermarkConfig::default().with_image_path(&image).validate().is_ok());
    }
}
