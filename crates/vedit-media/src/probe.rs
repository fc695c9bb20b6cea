//! Source sanity check with `ffprobe`.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// What a submission needs to know about a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Seconds; 0 when the container does not say
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

impl TryFrom<ProbeReport> for VideoInfo {
    type Error = MediaError;

    fn try_from(report: ProbeReport) -> MediaResult<Self> {
        let has_audio = report.streams.iter().any(|s| s.codec_type == "audio");
        let video = report
            .streams
            .into_iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| MediaError::InvalidVideo("no video stream".to_string()))?;

        let fps = [&video.avg_frame_rate, &video.r_frame_rate]
            .into_iter()
            .flatten()
            .find_map(|rate| frame_rate(rate))
            .unwrap_or(30.0);

        Ok(Self {
            duration: report
                .format
                .duration
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0),
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            fps,
            codec: video.codec_name.unwrap_or_default(),
            has_audio,
        })
    }
}

/// Run `ffprobe` on a file and summarize its first video stream.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(check_ffprobe()?)
        .args(["-v", "quiet", "-print_format", "json"])
        .args(["-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("ffprobe exited with {}", output.status),
            stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        });
    }

    let report: ProbeReport = serde_json::from_slice(&output.stdout)?;
    VideoInfo::try_from(report)
}

/// `"30000/1001"` or `"29.97"`; `None` for `0/0` and garbage.
fn frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => num.parse::<f64>().ok()? / den.parse::<f64>().ok()?,
        None => raw.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
