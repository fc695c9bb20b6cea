//! Look-related parameter values: aspect ratios, colour styles, filters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest numerator/denominator accepted in a `W:H` ratio.
pub const MAX_ASPECT_COMPONENT: u32 = 100;

/// Display aspect ratio written as `W:H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    /// Widescreen (16:9)
    pub const WIDESCREEN: AspectRatio = AspectRatio {
        width: 16,
        height: 9,
    };

    /// Standard portrait (9:16) for TikTok/Reels
    pub const PORTRAIT: AspectRatio = AspectRatio {
        width: 9,
        height: 16,
    };

    /// Square (1:1)
    pub const SQUARE: AspectRatio = AspectRatio {
        width: 1,
        height: 1,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the aspect ratio as a decimal.
    pub fn as_f64(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = AspectRatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| AspectRatioParseError::InvalidFormat(s.to_string()))?;

        let parse = |part: &str| -> Result<u32, AspectRatioParseError> {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(AspectRatioParseError::InvalidNumber(part.to_string()));
            }
            part.parse()
                .map_err(|_| AspectRatioParseError::InvalidNumber(part.to_string()))
        };

        let width = parse(w)?;
        let height = parse(h)?;

        if width == 0 || height == 0 {
            return Err(AspectRatioParseError::ZeroValue);
        }
        if width > MAX_ASPECT_COMPONENT || height > MAX_ASPECT_COMPONENT {
            return Err(AspectRatioParseError::OutOfRange(s.to_string()));
        }

        Ok(AspectRatio { width, height })
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = AspectRatioParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(value: AspectRatio) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Error)]
pub enum AspectRatioParseError {
    #[error("Invalid aspect ratio format: {0}, expected 'W:H'")]
    InvalidFormat(String),
    #[error("Invalid number in aspect ratio: {0}")]
    InvalidNumber(String),
    #[error("Aspect ratio cannot have zero values")]
    ZeroValue,
    #[error("Aspect ratio components must be at most 100: {0}")]
    OutOfRange(String),
}

/// Colour-grading style applied by the style stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StylePreset {
    Vintage,
    StrongContrast,
    Lighter,
    Darker,
    IncreaseContrast,
    CrossProcess,
    ColorNegative,
    MediumContrast,
    LinearContrast,
    /// Desaturated with strong contrast
    Noir,
}

impl StylePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            StylePreset::Vintage => "vintage",
            StylePreset::StrongContrast => "strong-contrast",
            StylePreset::Lighter => "lighter",
            StylePreset::Darker => "darker",
            StylePreset::IncreaseContrast => "increase-contrast",
            StylePreset::CrossProcess => "cross-process",
            StylePreset::ColorNegative => "color-negative",
            StylePreset::MediumContrast => "medium-contrast",
            StylePreset::LinearContrast => "linear-contrast",
            StylePreset::Noir => "noir",
        }
    }
}

impl fmt::Display for StylePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named video filter for the filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoFilter {
    Grayscale,
    Sepia,
    Blur,
    Sharpen,
    Vignette,
    Negate,
    Hflip,
    Vflip,
    Denoise,
}

impl VideoFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoFilter::Grayscale => "grayscale",
            VideoFilter::Sepia => "sepia",
            VideoFilter::Blur => "blur",
            VideoFilter::Sharpen => "sharpen",
            VideoFilter::Vignette => "vignette",
            VideoFilter::Negate => "negate",
            VideoFilter::Hflip => "hflip",
            VideoFilter::Vflip => "vflip",
            VideoFilter::Denoise => "denoise",
        }
    }
}

impl fmt::Display for VideoFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
