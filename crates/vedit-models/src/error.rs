//! Validation errors raised while checking a submission.

use thiserror::Error;

use crate::stage::StageName;

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Input rejected before any job exists. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Stage chain must contain at least one stage")]
    EmptyChain,

    #[error("Stage chain has {0} stages, at most {max} allowed", max = StageName::ALL.len())]
    ChainTooLong(usize),

    #[error("Stage '{0}' appears more than once in the chain")]
    DuplicateStage(StageName),

    #[error("Parameters given for '{0}', which is not in the stage chain")]
    UnexpectedParameters(String),

    #[error("Invalid parameters for '{stage}': {message}")]
    InvalidParameter { stage: StageName, message: String },

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Source file is {size} bytes, limit is {limit} bytes")]
    SourceTooLarge { size: u64, limit: u64 },
}

impl ValidationError {
    pub fn invalid_parameter(stage: StageName, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            stage,
            message: message.into(),
        }
    }

    pub fn invalid_source(message: impl Into<String>) -> Self {
        Self::InvalidSource(message.into())
    }
}
