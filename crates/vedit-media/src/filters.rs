//! FFmpeg filter tables for the look-changing stages.

use vedit_models::{Resolution, StylePreset, VideoFilter};

/// Sepia tone via the standard colour matrix.
pub const FILTER_SEPIA: &str =
    "colorchannelmixer=.393:.769:.189:0:.349:.686:.168:0:.272:.534:.131";

/// Filter expression for a named filter.
pub fn video_filter(filter: VideoFilter) -> &'static str {
    match filter {
        VideoFilter::Grayscale => "hue=s=0",
        VideoFilter::Sepia => FILTER_SEPIA,
        VideoFilter::Blur => "boxblur=5:1",
        VideoFilter::Sharpen => "unsharp=5:5:1.0:5:5:0.0",
        VideoFilter::Vignette => "vignette=PI/4",
        VideoFilter::Negate => "negate",
        VideoFilter::Hflip => "hflip",
        VideoFilter::Vflip => "vflip",
        VideoFilter::Denoise => "hqdn3d",
    }
}

/// Chain several named filters, applied in the given order.
pub fn filter_chain(filters: &[VideoFilter]) -> String {
    filters
        .iter()
        .map(|f| video_filter(*f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Colour grading for a style preset, built on ffmpeg's `curves` presets.
pub fn style_filter(style: StylePreset) -> String {
    let preset = match style {
        // Noir desaturates before the contrast curve.
        StylePreset::Noir => return "hue=s=0,curves=preset=strong_contrast".to_string(),
        StylePreset::Vintage => "vintage",
        StylePreset::StrongContrast => "strong_contrast",
        StylePreset::Lighter => "lighter",
        StylePreset::Darker => "darker",
        StylePreset::IncreaseContrast => "increase_contrast",
        StylePreset::CrossProcess => "cross_process",
        StylePreset::ColorNegative => "color_negative",
        StylePreset::MediumContrast => "medium_contrast",
        StylePreset::LinearContrast => "linear_contrast",
    };
    format!("curves=preset={}", preset)
}

/// Plain rescale.
pub fn filter_scale(width: u32, height: u32) -> String {
    format!("scale={}:{}", width, height)
}

/// Fit inside a canvas, letterboxing the remainder.
pub fn filter_fit_and_pad(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

/// Denoise and/or rescale for the enhancement stage.
pub fn filter_enhancement(denoise: bool, resolution: Option<Resolution>) -> Option<String> {
    let mut parts = Vec::new();
    if denoise {
        parts.push("hqdn3d".to_string());
    }
    if let Some(resolution) = resolution {
        let (w, h) = resolution.dimensions();
        parts.push(filter_scale(w, h));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

/// Mix the primary audio with a second input.
///
/// `duration` is ffmpeg's amix duration mode (`first`, `shortest`, `longest`).
pub fn filter_amix(second_volume: f64, duration: &str) -> String {
    format!(
        "[1:a]volume={:.2}[second];[0:a][second]amix=inputs=2:duration={}[aout]",
        second_volume, duration
    )
}

/// Build filter for thumbnail generation.
pub fn filter_thumbnail(width: u32) -> String {
    format!("scale={}:-2", width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_chain_order() {
        let chain = filter_chain(&[VideoFilter::Hflip, VideoFilter::Grayscale]);
        assert_eq!(chain, "hflip,hue=s=0");
    }

    #[test]
    fn test_style_filter() {
        assert_eq!(
            style_filter(StylePreset::CrossProcess),
            "curves=preset=cross_process"
        );
        assert!(style_filter(StylePreset::Noir).starts_with("hue=s=0,"));
    }

    #[test]
    fn test_fit_and_pad() {
        let filter = filter_fit_and_pad(720, 1280);
        assert_eq!(
            filter,
            "scale=720:1280:force_original_aspect_ratio=decrease,pad=720:1280:(ow-iw)/2:(oh-ih)/2"
        );
    }

    #[test]
    fn test_enhancement_filter() {
        assert_eq!(
            filter_enhancement(true, Some(Resolution::Hd720)).as_deref(),
            Some("hqdn3d,scale=1280:720")
        );
        assert_eq!(filter_enhancement(false, None), None);
    }

    #[test]
    fn test_amix() {
        let filter = filter_amix(1.0, "shortest");
        assert!(filter.contains("amix=inputs=2:duration=shortest"));
        assert!(filter.ends_with("[aout]"));
    }
}
