//! Structured job logging utilities.
//!
//! Every line carries the job id and the stage so a pipeline can be followed
//! across worker processes with a single field filter.

use tracing::{error, info, warn, Span};
use vedit_models::{JobId, StageName};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: StageName,
}

impl JobLogger {
    pub fn new(job_id: &JobId, stage: StageName) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
        }
    }

    /// Log the start of a stage attempt.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            "Stage started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            "Stage warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            stage = %self.stage,
            "Stage error: {}", message
        );
    }

    /// Log the completion of a stage attempt.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            "Stage completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Span wrapping one delivery, so engine and store logs inherit the fields.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stage",
            job_id = %self.job_id,
            stage = %self.stage
        )
    }
}
