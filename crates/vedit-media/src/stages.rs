//! Engine commands for each stage.
//!
//! Every builder returns an argument vector via [`FfmpegCommand`]; nothing
//! is ever passed through a shell.

use std::path::{Path, PathBuf};

use vedit_models::encoding::{
    DEFAULT_AUDIO_CODEC, DEFAULT_PRESET, DEFAULT_VIDEO_CODEC, WEBM_AUDIO_CODEC, WEBM_VIDEO_CODEC,
};
use vedit_models::{ContainerFormat, StageParams};

use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::filters::{
    filter_amix, filter_chain, filter_enhancement, filter_fit_and_pad, filter_scale, style_filter,
};
use crate::fs_utils::resolve_under_root;
use crate::thumbnail::thumbnail_command;
use crate::watermark::WatermarkConfig;

/// Files outside the upstream chain that stages may read.
#[derive(Debug, Clone)]
pub struct StageAssets {
    /// Root that narration/music paths are relative to
    pub media_root: PathBuf,
    pub watermark: WatermarkConfig,
}

impl StageAssets {
    pub fn new(media_root: impl Into<PathBuf>, watermark: WatermarkConfig) -> Self {
        Self {
            media_root: media_root.into(),
            watermark,
        }
    }

    fn resolve(&self, relative: &str) -> MediaResult<PathBuf> {
        resolve_under_root(&self.media_root, relative)
    }
}

/// Build the engine command that runs one stage from `input` to `output`.
pub fn build_stage_command(
    params: &StageParams,
    input: &Path,
    output: &Path,
    assets: &StageAssets,
) -> MediaResult<FfmpegCommand> {
    let cmd = FfmpegCommand::new(input, output);

    let cmd = match params {
        StageParams::Cut(p) => cmd
            .seek(p.start_secs)
            .duration(p.duration_secs)
            .audio_codec("copy"),

        StageParams::Filter(p) => cmd.video_filter(filter_chain(&p.filters)),

        StageParams::Resolution(p) => {
            let (w, h) = p.resolution.dimensions();
            cmd.video_filter(filter_scale(w, h))
        }

        StageParams::Aspect(p) => cmd
            .output_arg("-aspect")
            .output_arg(p.aspect_ratio.to_string())
            .audio_codec("copy"),

        StageParams::AdjustFormat(p) => {
            let (w, h) = p.format.canvas();
            cmd.video_filter(filter_fit_and_pad(w, h)).audio_codec("copy")
        }

        StageParams::Style(p) => cmd.video_filter(style_filter(p.style)).audio_codec("copy"),

        StageParams::Voice(p) => {
            let narration = assets.resolve(&p.narration_path)?;
            mix_second_audio(cmd, &narration, p.narration_volume, "first")
        }

        StageParams::Enhancement(p) => match filter_enhancement(p.denoise, p.resolution) {
            Some(filter) => cmd.video_filter(filter).audio_codec("copy"),
            None => cmd.output_args(["-c", "copy"]),
        },

        StageParams::Compression(p) => cmd
            .video_bitrate_kbps(p.video_bitrate_kbps())
            .audio_codec("copy"),

        StageParams::Thumbnail(p) => thumbnail_command(input, output, p),

        StageParams::Finalize(p) => {
            let cmd = if p.include_watermark {
                assets.watermark.validate()?;
                cmd.extra_input(&assets.watermark.image_path)
                    .filter_complex(assets.watermark.overlay_filter())
                    .output_args(["-map", "[vout]", "-map", "0:a?"])
            } else {
                cmd
            };
            finalize_codecs(cmd, p.format)
        }

        StageParams::Export(p) => cmd
            .video_codec(DEFAULT_VIDEO_CODEC)
            .preset(p.preset.as_str())
            .crf(p.crf)
            .audio_codec(DEFAULT_AUDIO_CODEC),

        StageParams::AddMusic(p) => {
            let music = assets.resolve(&p.music_path)?;
            mix_second_audio(cmd, &music, 1.0, "shortest")
        }
    };

    Ok(cmd)
}

/// Mix a second audio input into the soundtrack, keeping the video stream.
fn mix_second_audio(cmd: FfmpegCommand, audio: &Path, volume: f64, duration: &str) -> FfmpegCommand {
    cmd.extra_input(audio)
        .filter_complex(filter_amix(volume, duration))
        .output_args(["-map", "0:v", "-map", "[aout]"])
        .video_codec("copy")
        .audio_codec(DEFAULT_AUDIO_CODEC)
}

fn finalize_codecs(cmd: FfmpegCommand, format: ContainerFormat) -> FfmpegCommand {
    match format {
        ContainerFormat::Webm => cmd
            .video_codec(WEBM_VIDEO_CODEC)
            .audio_codec(WEBM_AUDIO_CODEC),
        ContainerFormat::Mp4 | ContainerFormat::Mov => cmd
            .video_codec(DEFAULT_VIDEO_CODEC)
            .preset(DEFAULT_PRESET)
            .audio_codec(DEFAULT_AUDIO_CODEC)
            .output_args(["-movflags", "+faststart"]),
        ContainerFormat::Mkv => cmd
            .video_codec(DEFAULT_VIDEO_CODEC)
            .preset(DEFAULT_PRESET)
            .audio_codec(DEFAULT_AUDIO_CODEC),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use serde_json::json;
    use tempfile::TempDir;
    use vedit_models::StageName;

    fn params(stage: StageName, raw: serde_json::Value) -> StageParams {
        StageParams::parse(stage, &raw).unwrap()
    }

    fn assets(root: &Path) -> StageAssets {
        StageAssets::new(
            root,
            WatermarkConfig::default().with_image_path(root.join("wm.png")),
        )
    }

    fn args_for(stage: StageName, raw: serde_json::Value, root: &Path) -> Vec<String> {
        build_stage_command(
            &params(stage, raw),
            Path::new("/w/in.mp4"),
            Path::new("/w/out.mp4"),
            &assets(root),
        )
        .unwrap()
        .build_args()
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_cut() {
        let dir = TempDir::new().unwrap();
        let args = args_for(StageName::Cut, json!({}), dir.path());
        assert!(has_pair(&args, "-ss", "2.000"));
        assert!(has_pair(&args, "-t", "5.000"));
        assert!(has_pair(&args, "-c:a", "copy"));
    }

    #[test]
    fn test_resolution_and_aspect() {
        let dir = TempDir::new().unwrap();
        let args = args_for(StageName::Resolution, json!({"resolution": "2k"}), dir.path());
        assert!(has_pair(&args, "-vf", "scale=2560:1440"));

        let args = args_for(StageName::Aspect, json!({"aspect_ratio": "4:3"}), dir.path());
        assert!(has_pair(&args, "-aspect", "4:3"));
    }

    #[test]
    fn test_compression_bitrate() {
        let dir = TempDir::new().unwrap();
        let args = args_for(StageName::Compression, json!({"target_size_mb": 20}), dir.path());
        assert!(has_pair(&args, "-b:v", "2730k"));
        assert!(has_pair(&args, "-bufsize", "2730k"));
    }

    #[test]
    fn test_export() {
        let dir = TempDir::new().unwrap();
        let args = args_for(StageName::Export, json!({"crf": 20, "preset": "slow"}), dir.path());
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-preset", "slow"));
        assert!(has_pair(&args, "-crf", "20"));
    }

    #[test]
    fn test_add_music_resolves_under_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bed.mp3"), b"x").unwrap();
        let args = args_for(StageName::AddMusic, json!({"music_path": "bed.mp3"}), dir.path());
        assert!(args.iter().any(|a| a.ends_with("bed.mp3")));
        assert!(args.iter().any(|a| a.contains("duration=shortest")));
        assert!(has_pair(&args, "-c:v", "copy"));
    }

    #[test]
    fn test_voice_missing_narration() {
        let dir = TempDir::new().unwrap();
        let err = build_stage_command(
            &params(StageName::Voice, json!({"narration_path": "nope.wav"})),
            Path::new("/w/in.mp4"),
            Path::new("/w/out.mp4"),
            &assets(dir.path()),
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_finalize_watermark_requires_asset() {
        let dir = TempDir::new().unwrap();
        let finalize = params(StageName::Finalize, json!({"include_watermark": true}));
        let err = build_stage_command(
            &finalize,
            Path::new("/w/in.mp4"),
            Path::new("/w/out.mp4"),
            &assets(dir.path()),
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::MissingAsset(_)));

        std::fs::write(dir.path().join("wm.png"), b"png").unwrap();
        let args = build_stage_command(
            &finalize,
            Path::new("/w/in.mp4"),
            Path::new("/w/out.mp4"),
            &assets(dir.path()),
        )
        .unwrap()
        .build_args();
        assert!(has_pair(&args, "-filter_complex", "[0:v][1:v]overlay=10:10[vout]"));
        assert!(has_pair(&args, "-map", "[vout]"));
    }

    #[test]
    fn test_finalize_webm_codecs() {
        let dir = TempDir::new().unwrap();
        let args = args_for(StageName::Finalize, json!({"format": "webm"}), dir.path());
        assert!(has_pair(&args, "-c:v", "libvpx-vp9"));
        assert!(has_pair(&args, "-c:a", "libopus"));
    }

    #[test]
    fn test_thumbnail_single_frame() {
        let dir = TempDir::new().unwrap();
        let args = args_for(StageName::Thumbnail, json!({"width": 320}), dir.path());
        assert!(has_pair(&args, "-vframes", "1"));
        assert!(has_pair(&args, "-vf", "scale=320:-2"));
    }
}
