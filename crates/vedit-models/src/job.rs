//! Job record: the unit of work flowing through the stage chain.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::params::{params_map, StageParams};
use crate::stage::StageName;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Parse a client-supplied id; only canonical UUIDs are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s)
            .ok()
            .map(|uuid| Self(uuid.hyphenated().to_string()))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, first stage not started yet
    #[default]
    Queued,
    /// Some stage has started
    Running,
    /// Every stage produced its artifact
    Succeeded,
    /// A stage exhausted its attempts or the pipeline deadline passed
    Failed,
    /// Canceled by the owner
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Claim by one worker on the attempt it is running.
///
/// Other deliveries of the same stage hold off while the lease is live; an
/// expired lease belongs to a worker that died mid-attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageLease {
    pub stage: StageName,
    /// Token of the handler running the attempt
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl StageLease {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A media-processing job and its progress through the stage chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    /// Identity of the submitter
    pub owner_id: String,

    /// Validated source file
    pub source_path: PathBuf,

    /// Stages to run, in order. Fixed at submission.
    pub stage_chain: Vec<StageName>,

    /// Index into `stage_chain` of the stage to run next
    pub current_stage_index: usize,

    pub status: JobStatus,

    /// Per-stage parameters, one entry per stage in the chain
    #[serde(with = "params_map")]
    #[schemars(with = "BTreeMap<StageName, serde_json::Value>")]
    pub parameters: BTreeMap<StageName, StageParams>,

    /// Output file per completed stage
    #[serde(default)]
    pub artifact_paths: BTreeMap<StageName, PathBuf>,

    /// Failed attempts per stage
    #[serde(default)]
    pub attempts: BTreeMap<StageName, u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Set while a stage attempt is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<StageLease>,

    /// Bumped on every persisted write
    #[serde(default)]
    pub revision: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// New queued job positioned at the first stage.
    pub fn new(
        owner_id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        stage_chain: Vec<StageName>,
        parameters: BTreeMap<StageName, StageParams>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner_id: owner_id.into(),
            source_path: source_path.into(),
            stage_chain,
            current_stage_index: 0,
            status: JobStatus::Queued,
            parameters,
            artifact_paths: BTreeMap::new(),
            attempts: BTreeMap::new(),
            last_error: None,
            lease: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Stage the job is waiting on, `None` once the chain is exhausted.
    pub fn current_stage(&self) -> Option<StageName> {
        self.stage_chain.get(self.current_stage_index).copied()
    }

    /// Stage completed most recently.
    pub fn previous_stage(&self) -> Option<StageName> {
        self.current_stage_index
            .checked_sub(1)
            .and_then(|i| self.stage_chain.get(i))
            .copied()
    }

    pub fn is_last_stage(&self) -> bool {
        self.current_stage_index + 1 >= self.stage_chain.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn params_for(&self, stage: StageName) -> Option<&StageParams> {
        self.parameters.get(&stage)
    }

    pub fn attempts_for(&self, stage: StageName) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Live lease on `stage` held by anyone other than `holder`.
    pub fn leased_elsewhere(&self, stage: StageName, holder: &str, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_some_and(|lease| {
            lease.stage == stage && lease.holder != holder && lease.is_live(now)
        })
    }

    /// Input for the current stage: the most recent media artifact of an
    /// earlier stage, or the source when there is none.
    pub fn upstream_input(&self) -> &Path {
        let done = self.current_stage_index.min(self.stage_chain.len());
        self.stage_chain[..done]
            .iter()
            .rev()
            .filter(|stage| stage.produces_media())
            .find_map(|stage| self.artifact_paths.get(stage))
            .map(PathBuf::as_path)
            .unwrap_or(&self.source_path)
    }

    /// Last media artifact of a succeeded job.
    pub fn final_artifact(&self) -> Option<&Path> {
        if self.status != JobStatus::Succeeded {
            return None;
        }
        self.stage_chain
            .iter()
            .rev()
            .filter(|stage| stage.produces_media())
            .find_map(|stage| self.artifact_paths.get(stage))
            .map(PathBuf::as_path)
    }

    /// Share of stages completed, 0-100.
    pub fn progress_percent(&self) -> u8 {
        if self.stage_chain.is_empty() {
            return 0;
        }
        let done = self.current_stage_index.min(self.stage_chain.len());
        ((done * 100) / self.stage_chain.len()) as u8
    }

    /// Mark a write: bump the revision and the update time.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        self.updated_at = now;
    }
}
