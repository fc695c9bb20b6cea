//! Submission request/response bodies and chain validation.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ValidationError, ValidationResult};
use crate::job::{Job, JobId, JobStatus};
use crate::params::StageParams;
use crate::stage::StageName;

/// Body of `POST /api/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmitRequest {
    /// Source file, relative to the media root.
    pub source_path: String,

    /// Stage names in execution order.
    pub stages: Vec<String>,

    /// Parameters keyed by stage name.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// A stage chain with parameters for every stage, ready to become a job.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedChain {
    pub stages: Vec<StageName>,
    pub parameters: BTreeMap<StageName, StageParams>,
}

impl SubmitRequest {
    /// Check stage names and parameters. Does not touch the filesystem.
    pub fn validate_chain(&self) -> ValidationResult<ValidatedChain> {
        if self.source_path.trim().is_empty() {
            return Err(ValidationError::invalid_source("source_path is empty"));
        }
        if self.stages.is_empty() {
            return Err(ValidationError::EmptyChain);
        }
        if self.stages.len() > StageName::ALL.len() {
            return Err(ValidationError::ChainTooLong(self.stages.len()));
        }

        let mut seen = BTreeSet::new();
        let mut stages = Vec::with_capacity(self.stages.len());
        for raw in &self.stages {
            let stage: StageName = raw.parse()?;
            if !seen.insert(stage) {
                return Err(ValidationError::DuplicateStage(stage));
            }
            stages.push(stage);
        }

        let mut raw_params: BTreeMap<StageName, &Value> = BTreeMap::new();
        for (key, value) in &self.parameters {
            let stage: StageName = key.parse()?;
            if !seen.contains(&stage) {
                return Err(ValidationError::UnexpectedParameters(key.clone()));
            }
            raw_params.insert(stage, value);
        }

        let parameters = stages
            .iter()
            .map(|stage| {
                let raw = raw_params.get(stage).copied().unwrap_or(&Value::Null);
                StageParams::parse(*stage, raw).map(|params| (*stage, params))
            })
            .collect::<ValidationResult<BTreeMap<_, _>>>()?;

        Ok(ValidatedChain { stages, parameters })
    }
}

/// Body returned by a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Body of `GET /api/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
}
