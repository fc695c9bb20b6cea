//! Geometry and container values: resolutions, frame formats, containers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Target output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    Sd480,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    FullHd1080,
    #[serde(rename = "2k")]
    Qhd2k,
    #[serde(rename = "4k")]
    Uhd4k,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Sd480 => "480p",
            Resolution::Hd720 => "720p",
            Resolution::FullHd1080 => "1080p",
            Resolution::Qhd2k => "2k",
            Resolution::Uhd4k => "4k",
        }
    }

    /// Pixel dimensions as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Sd480 => (640, 480),
            Resolution::Hd720 => (1280, 720),
            Resolution::FullHd1080 => (1920, 1080),
            Resolution::Qhd2k => (2560, 1440),
            Resolution::Uhd4k => (3840, 2160),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canvas shape for the adjust-format stage (scale + letterbox pad).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameFormat {
    Square,
    Vertical,
    Portrait,
    Horizontal,
    Landscape,
}

impl FrameFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameFormat::Square => "square",
            FrameFormat::Vertical => "vertical",
            FrameFormat::Portrait => "portrait",
            FrameFormat::Horizontal => "horizontal",
            FrameFormat::Landscape => "landscape",
        }
    }

    /// Canvas size as (width, height).
    pub fn canvas(&self) -> (u32, u32) {
        match self {
            FrameFormat::Square => (720, 720),
            FrameFormat::Vertical | FrameFormat::Portrait => (720, 1280),
            FrameFormat::Horizontal | FrameFormat::Landscape => (1280, 720),
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output container produced by the finalize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mov,
    Mkv,
    Webm,
}

impl ContainerFormat {
    /// File extension, also used as the ffmpeg muxer hint.
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Webm => "webm",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// x264 speed/efficiency preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncodePreset {
    Ultrafast,
    Veryfast,
    #[default]
    Fast,
    Medium,
    Slow,
}

impl EncodePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodePreset::Ultrafast => "ultrafast",
            EncodePreset::Veryfast => "veryfast",
            EncodePreset::Fast => "fast",
            EncodePreset::Medium => "medium",
            EncodePreset::Slow => "slow",
        }
    }
}

impl fmt::Display for EncodePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
