//! Shared data models for the vedit pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their status and the stage chain
//! - Stage names and per-stage descriptors
//! - Typed, validated per-stage parameters
//! - Queue messages and submission bodies

pub mod encoding;
pub mod error;
pub mod format;
pub mod job;
pub mod message;
pub mod params;
pub mod request;
pub mod stage;
pub mod style;

// Re-export common types
pub use error::{ValidationError, ValidationResult};
pub use format::{ContainerFormat, EncodePreset, FrameFormat, Resolution};
pub use job::{Job, JobId, JobStatus, StageLease};
pub use message::StageMessage;
pub use params::{
    AddMusicParams, AdjustFormatParams, AspectParams, CompressionParams, CutParams,
    EnhancementParams, ExportParams, FilterParams, FinalizeParams, ResolutionParams,
    StageParams, StyleParams, ThumbnailParams, VoiceParams,
};
pub use request::{JobListResponse, SubmitRequest, SubmitResponse, ValidatedChain};
pub use stage::{StageDescriptor, StageName, DEFAULT_MAX_ATTEMPTS, STAGE_QUEUE_PREFIX};
pub use style::{AspectRatio, StylePreset, VideoFilter};
