//! Pipeline stage names and their static descriptors.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Prefix shared by every per-stage queue.
pub const STAGE_QUEUE_PREFIX: &str = "vedit:stage:";

/// Default number of attempts a stage gets before the job fails.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One discrete transformation a job can run through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    Cut,
    Filter,
    Resolution,
    Aspect,
    AdjustFormat,
    Style,
    Voice,
    Enhancement,
    Compression,
    Thumbnail,
    Finalize,
    Export,
    AddMusic,
}

impl StageName {
    /// Every supported stage, in declaration order.
    pub const ALL: &'static [StageName] = &[
        StageName::Cut,
        StageName::Filter,
        StageName::Resolution,
        StageName::Aspect,
        StageName::AdjustFormat,
        StageName::Style,
        StageName::Voice,
        StageName::Enhancement,
        StageName::Compression,
        StageName::Thumbnail,
        StageName::Finalize,
        StageName::Export,
        StageName::AddMusic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Cut => "cut",
            StageName::Filter => "filter",
            StageName::Resolution => "resolution",
            StageName::Aspect => "aspect",
            StageName::AdjustFormat => "adjust-format",
            StageName::Style => "style",
            StageName::Voice => "voice",
            StageName::Enhancement => "enhancement",
            StageName::Compression => "compression",
            StageName::Thumbnail => "thumbnail",
            StageName::Finalize => "finalize",
            StageName::Export => "export",
            StageName::AddMusic => "add-music",
        }
    }

    /// Name of the queue this stage's workers consume.
    pub fn queue_name(&self) -> String {
        format!("{}{}", STAGE_QUEUE_PREFIX, self.as_str())
    }

    /// Whether the stage output is a video that later stages can consume.
    ///
    /// Thumbnails are side outputs: they are recorded on the job but never
    /// used as the input of a following stage.
    pub fn produces_media(&self) -> bool {
        !matches!(self, StageName::Thumbnail)
    }

    /// Built-in descriptor with default retry and timeout settings.
    pub fn descriptor(&self) -> StageDescriptor {
        let timeout_secs = match self {
            StageName::Thumbnail => 120,
            StageName::Cut | StageName::Aspect | StageName::AdjustFormat => 600,
            StageName::Filter
            | StageName::Resolution
            | StageName::Style
            | StageName::Voice
            | StageName::AddMusic => 900,
            StageName::Enhancement
            | StageName::Compression
            | StageName::Finalize
            | StageName::Export => 1800,
        };

        StageDescriptor {
            name: *self,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Upper-case form used in environment variable names (`ADD_MUSIC`).
    pub fn env_key(&self) -> String {
        self.as_str().replace('-', "_").to_uppercase()
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StageName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        StageName::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownStage(s.to_string()))
    }
}

/// Static per-stage execution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: StageName,
    /// Attempts before the job is marked failed (first run included).
    pub max_attempts: u32,
    /// Wall-clock budget for one engine invocation.
    pub timeout: Duration,
}

impl StageDescriptor {
    pub fn queue_name(&self) -> String {
        self.name.queue_name()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parse() {
        assert_eq!("cut".parse::<StageName>().unwrap(), StageName::Cut);
        assert_eq!("add-music".parse::<StageName>().unwrap(), StageName::AddMusic);
        assert_eq!("ADD_MUSIC".parse::<StageName>().unwrap(), StageName::AddMusic);
        assert!(matches!(
            "transmogrify".parse::<StageName>(),
            Err(ValidationError::UnknownStage(_))
        ));
    }

    #[test]
    fn test_stage_serde_is_kebab_case() {
        let json = serde_json::to_string(&StageName::AdjustFormat).unwrap();
        assert_eq!(json, "\"adjust-format\"");
        let back: StageName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageName::AdjustFormat);
    }

    #[test]
    fn test_queue_names_are_distinct() {
        let mut names: Vec<String> = StageName::ALL.iter().map(|s| s.queue_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), StageName::ALL.len());
        assert_eq!(StageName::Compression.queue_name(), "vedit:stage:compression");
    }

    #[test]
    fn test_descriptor_defaults() {
        let thumb = StageName::Thumbnail.descriptor();
        assert_eq!(thumb.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(thumb.timeout, Duration::from_secs(120));
        assert!(!StageName::Thumbnail.produces_media());
        assert!(StageName::Export.produces_media());
        assert_eq!(thumb.with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_env_key() {
        assert_eq!(StageName::AddMusic.env_key(), "ADD_MUSIC");
        assert_eq!(StageName::Cut.env_key(), "CUT");
    }
}
