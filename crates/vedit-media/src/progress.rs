//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fold one `key=value` line of `-progress` output into `self`.
    ///
    /// Returns a snapshot at each `progress=` marker, `None` otherwise.
    pub fn apply_line(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            // Despite the name ffmpeg reports microseconds here too.
            "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.frame = frame;
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.speed = speed;
                }
            }
            "progress" => {
                if value == "end" {
                    self.is_complete = true;
                }
                return Some(self.clone());
            }
            _ => {}
        }
        None
    }

    /// Whether a stderr line belongs to the `-progress` stream.
    pub fn is_progress_line(line: &str) -> bool {
        matches!(
            line.split_once('=').map(|(k, _)| k),
            Some(
                "frame"
                    | "fps"
                    | "stream_0_0_q"
                    | "bitrate"
                    | "total_size"
                    | "out_time_us"
                    | "out_time_ms"
                    | "out_time"
                    | "dup_frames"
                    | "drop_frames"
                    | "speed"
                    | "progress"
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_parsing() {
        let mut progress = FfmpegProgress::default();

        assert!(progress.apply_line("out_time_us=5000000").is_none());
        assert_eq!(progress.out_time_ms, 5000);

        progress.apply_line("speed=1.5x");
        assert!((progress.speed - 1.5).abs() < 0.01);
        progress.apply_line("speed=N/A");
        assert!((progress.speed - 1.5).abs() < 0.01);

        let snapshot = progress.apply_line("progress=end").unwrap();
        assert!(snapshot.is_complete);
    }

    #[test]
    fn test_progress_line_detection() {
        assert!(FfmpegProgress::is_progress_line("out_time=00:00:01.000000"));
        assert!(!FfmpegProgress::is_progress_line(
            "in.mp4: Invalid data found when processing input"
        ));
    }
}
