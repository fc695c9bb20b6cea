//! Typed per-stage parameters.
//!
//! Parameters travel as a JSON object keyed by stage name. Each entry is
//! parsed into the struct for its stage with unknown fields rejected,
//! defaults filled in and ranges checked with `validator`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::encoding::{
    DEFAULT_COMPRESSION_DURATION_SECS, DEFAULT_COMPRESSION_TARGET_MB, DEFAULT_CUT_DURATION_SECS,
    DEFAULT_CUT_START_SECS, DEFAULT_EXPORT_CRF, DEFAULT_THUMBNAIL_TIMESTAMP_SECS,
    DEFAULT_THUMBNAIL_WIDTH, MIN_COMPRESSION_BITRATE_KBPS, THUMBNAIL_EXTENSION, VIDEO_EXTENSION,
};
use crate::error::{ValidationError, ValidationResult};
use crate::format::{ContainerFormat, EncodePreset, FrameFormat, Resolution};
use crate::stage::StageName;
use crate::style::{AspectRatio, StylePreset, VideoFilter};

fn default_cut_start() -> f64 {
    DEFAULT_CUT_START_SECS
}
fn default_cut_duration() -> f64 {
    DEFAULT_CUT_DURATION_SECS
}
fn default_volume() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_enhance_resolution() -> Option<Resolution> {
    Some(Resolution::Hd720)
}
fn default_target_mb() -> u32 {
    DEFAULT_COMPRESSION_TARGET_MB
}
fn default_assumed_duration() -> u32 {
    DEFAULT_COMPRESSION_DURATION_SECS
}
fn default_thumb_timestamp() -> f64 {
    DEFAULT_THUMBNAIL_TIMESTAMP_SECS
}
fn default_thumb_width() -> u32 {
    DEFAULT_THUMBNAIL_WIDTH
}
fn default_crf() -> u8 {
    DEFAULT_EXPORT_CRF
}

/// Trim a window out of the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CutParams {
    #[serde(default = "default_cut_start")]
    #[validate(range(min = 0.0))]
    pub start_secs: f64,

    #[serde(default = "default_cut_duration")]
    #[validate(range(exclusive_min = 0.0, max = 3600.0))]
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FilterParams {
    #[validate(length(min = 1, max = 8))]
    pub filters: Vec<VideoFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ResolutionParams {
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AspectParams {
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AdjustFormatParams {
    pub format: FrameFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StyleParams {
    pub style: StylePreset,
}

/// Mix a narration track over the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct VoiceParams {
    /// Path relative to the media root.
    #[validate(length(min = 1))]
    pub narration_path: String,

    #[serde(default = "default_volume")]
    #[validate(range(exclusive_min = 0.0, max = 4.0))]
    pub narration_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EnhancementParams {
    #[serde(default = "default_true")]
    pub denoise: bool,

    /// Output size; `null` keeps the input size.
    #[serde(default = "default_enhance_resolution")]
    pub resolution: Option<Resolution>,
}

/// Re-encode at a bitrate that aims for a file size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CompressionParams {
    #[serde(default = "default_target_mb")]
    #[validate(range(min = 1, max = 4096))]
    pub target_size_mb: u32,

    #[serde(default = "default_assumed_duration")]
    #[validate(range(min = 1, max = 86400))]
    pub assumed_duration_secs: u32,
}

impl CompressionParams {
    /// Video bitrate in kbit/s for the target size over the assumed duration.
    pub fn video_bitrate_kbps(&self) -> u64 {
        (self.target_size_mb as u64 * 8192) / self.assumed_duration_secs.max(1) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ThumbnailParams {
    #[serde(default = "default_thumb_timestamp")]
    #[validate(range(min = 0.0))]
    pub timestamp_secs: f64,

    #[serde(default = "default_thumb_width")]
    #[validate(range(min = 16, max = 3840))]
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FinalizeParams {
    #[serde(default)]
    pub include_watermark: bool,

    #[serde(default)]
    pub format: ContainerFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExportParams {
    #[serde(default = "default_crf")]
    #[validate(range(max = 51))]
    pub crf: u8,

    #[serde(default)]
    pub preset: EncodePreset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AddMusicParams {
    /// Path relative to the media root.
    #[validate(length(min = 1))]
    pub music_path: String,
}

/// Parameters for one stage, already validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StageParams {
    Cut(CutParams),
    Filter(FilterParams),
    Resolution(ResolutionParams),
    Aspect(AspectParams),
    AdjustFormat(AdjustFormatParams),
    Style(StyleParams),
    Voice(VoiceParams),
    Enhancement(EnhancementParams),
    Compression(CompressionParams),
    Thumbnail(ThumbnailParams),
    Finalize(FinalizeParams),
    Export(ExportParams),
    AddMusic(AddMusicParams),
}

fn parse_as<T>(stage: StageName, raw: &Value) -> ValidationResult<T>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    // A missing entry means "all defaults".
    let raw = match raw {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };

    let params: T = serde_json::from_value(raw)
        .map_err(|e| ValidationError::invalid_parameter(stage, e.to_string()))?;
    params
        .validate()
        .map_err(|e| ValidationError::invalid_parameter(stage, e.to_string()))?;
    Ok(params)
}

impl StageParams {
    /// Parse and validate the raw JSON for `stage`. `Value::Null` applies defaults.
    pub fn parse(stage: StageName, raw: &Value) -> ValidationResult<Self> {
        Ok(match stage {
            StageName::Cut => StageParams::Cut(parse_as(stage, raw)?),
            StageName::Filter => StageParams::Filter(parse_as(stage, raw)?),
            StageName::Resolution => StageParams::Resolution(parse_as(stage, raw)?),
            StageName::Aspect => StageParams::Aspect(parse_as(stage, raw)?),
            StageName::AdjustFormat => StageParams::AdjustFormat(parse_as(stage, raw)?),
            StageName::Style => StageParams::Style(parse_as(stage, raw)?),
            StageName::Voice => StageParams::Voice(parse_as(stage, raw)?),
            StageName::Enhancement => StageParams::Enhancement(parse_as(stage, raw)?),
            StageName::Compression => {
                let params: CompressionParams = parse_as(stage, raw)?;
                let kbps = params.video_bitrate_kbps();
                if kbps < MIN_COMPRESSION_BITRATE_KBPS {
                    return Err(ValidationError::invalid_parameter(
                        stage,
                        format!(
                            "target works out to {} kbit/s, minimum is {}",
                            kbps, MIN_COMPRESSION_BITRATE_KBPS
                        ),
                    ));
                }
                StageParams::Compression(params)
            }
            StageName::Thumbnail => StageParams::Thumbnail(parse_as(stage, raw)?),
            StageName::Finalize => StageParams::Finalize(parse_as(stage, raw)?),
            StageName::Export => StageParams::Export(parse_as(stage, raw)?),
            StageName::AddMusic => StageParams::AddMusic(parse_as(stage, raw)?),
        })
    }

    pub fn stage(&self) -> StageName {
        match self {
            StageParams::Cut(_) => StageName::Cut,
            StageParams::Filter(_) => StageName::Filter,
            StageParams::Resolution(_) => StageName::Resolution,
            StageParams::Aspect(_) => StageName::Aspect,
            StageParams::AdjustFormat(_) => StageName::AdjustFormat,
            StageParams::Style(_) => StageName::Style,
            StageParams::Voice(_) => StageName::Voice,
            StageParams::Enhancement(_) => StageName::Enhancement,
            StageParams::Compression(_) => StageName::Compression,
            StageParams::Thumbnail(_) => StageName::Thumbnail,
            StageParams::Finalize(_) => StageName::Finalize,
            StageParams::Export(_) => StageName::Export,
            StageParams::AddMusic(_) => StageName::AddMusic,
        }
    }

    /// Extension of the file this stage writes.
    pub fn output_extension(&self) -> &'static str {
        match self {
            StageParams::Thumbnail(_) => THUMBNAIL_EXTENSION,
            StageParams::Finalize(p) => p.format.extension(),
            _ => VIDEO_EXTENSION,
        }
    }

    /// Media-root-relative files this stage reads besides its upstream input.
    pub fn referenced_files(&self) -> Vec<&str> {
        match self {
            StageParams::Voice(p) => vec![p.narration_path.as_str()],
            StageParams::AddMusic(p) => vec![p.music_path.as_str()],
            _ => Vec::new(),
        }
    }
}

/// Serde adapter for `BTreeMap<StageName, StageParams>`: each entry is
/// re-parsed with the parser for its key.
pub mod params_map {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    use super::StageParams;
    use crate::stage::StageName;

    pub fn serialize<S>(map: &BTreeMap<StageName, StageParams>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<StageName, StageParams>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<StageName, Value>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(stage, value)| {
                StageParams::parse(stage, &value)
                    .map(|params| (stage, params))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_in() {
        let params = StageParams::parse(StageName::Cut, &Value::Null).unwrap();
        assert_eq!(
            params,
            StageParams::Cut(CutParams {
                start_secs: 2.0,
                duration_secs: 5.0
            })
        );

        let export = StageParams::parse(StageName::Export, &json!({})).unwrap();
        match export {
            StageParams::Export(p) => {
                assert_eq!(p.crf, 24);
                assert_eq!(p.preset, EncodePreset::Fast);
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn test_required_fields() {
        let err = StageParams::parse(StageName::Resolution, &Value::Null).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidParameter {
                stage: StageName::Resolution,
                ..
            }
        ));
        assert!(StageParams::parse(StageName::AddMusic, &Value::Null).is_err());
        assert!(StageParams::parse(StageName::Filter, &json!({"filters": []})).is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = StageParams::parse(StageName::Cut, &json!({"start": 1})).unwrap_err();
        assert!(err.to_string().contains("cut"));
    }

    #[test]
    fn test_ranges() {
        assert!(StageParams::parse(StageName::Cut, &json!({"duration_secs": 0})).is_err());
        assert!(StageParams::parse(StageName::Cut, &json!({"start_secs": -1})).is_err());
        assert!(StageParams::parse(StageName::Export, &json!({"crf": 52})).is_err());
        assert!(StageParams::parse(StageName::Thumbnail, &json!({"width": 8})).is_err());
        assert!(
            StageParams::parse(StageName::Compression, &json!({"target_size_mb": 0})).is_err()
        );
        assert!(StageParams::parse(
            StageName::Voice,
            &json!({"narration_path": "a.mp3", "narration_volume": 5})
        )
        .is_err());
    }

    #[test]
    fn test_compression_bitrate() {
        let p = CompressionParams {
            target_size_mb: 10,
            assumed_duration_secs: 60,
        };
        assert_eq!(p.video_bitrate_kbps(), 1365);
    }

    #[test]
    fn test_compression_bitrate_floor() {
        // 1 MB over 128 s is exactly 64 kbit/s
        let at_floor = StageParams::parse(
            StageName::Compression,
            &json!({"target_size_mb": 1, "assumed_duration_secs": 128}),
        );
        assert!(at_floor.is_ok());

        let err = StageParams::parse(
            StageName::Compression,
            &json!({"target_size_mb": 1, "assumed_duration_secs": 129}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidParameter {
                stage: StageName::Compression,
                ..
            }
        ));

        let day = StageParams::parse(
            StageName::Compression,
            &json!({"target_size_mb": 1, "assumed_duration_secs": 86400}),
        );
        assert!(day.is_err());
        assert!(StageParams::parse(StageName::Compression, &Value::Null).is_ok());
    }

    #[test]
    fn test_output_extension() {
        let thumb = StageParams::parse(StageName::Thumbnail, &Value::Null).unwrap();
        assert_eq!(thumb.output_extension(), "jpg");
        let fin = StageParams::parse(StageName::Finalize, &json!({"format": "mkv"})).unwrap();
        assert_eq!(fin.output_extension(), "mkv");
        let cut = StageParams::parse(StageName::Cut, &Value::Null).unwrap();
        assert_eq!(cut.output_extension(), "mp4");
    }

    #[test]
    fn test_referenced_files() {
        let music =
            StageParams::parse(StageName::AddMusic, &json!({"music_path": "audio/bed.mp3"}))
                .unwrap();
        assert_eq!(music.referenced_files(), vec!["audio/bed.mp3"]);
        assert_eq!(music.stage(), StageName::AddMusic);
    }
}
