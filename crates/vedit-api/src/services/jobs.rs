//! Job submission and owner-side job management.
//!
//! Every write goes through the store's compare-and-swap, so a request racing
//! a worker either wins cleanly or re-reads and decides again.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use vedit_media::{probe_video, resolve_under_root};
use vedit_models::{Job, JobId, JobStatus, StageMessage, SubmitRequest, ValidationError};
use vedit_queue::StageQueue;
use vedit_store::JobStore;

use crate::auth::AuthUser;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Rounds of reload-and-retry for a lost compare-and-swap.
const MAX_CAS_ROUNDS: usize = 5;

/// Job operations behind the HTTP handlers.
#[derive(Clone)]
pub struct JobService {
    config: Arc<ApiConfig>,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn StageQueue>,
}

impl JobService {
    pub fn new(
        config: Arc<ApiConfig>,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn StageQueue>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
        }
    }

    /// Validate a submission, create the job and enqueue its first stage.
    ///
    /// Nothing is written unless the whole request is valid. If the enqueue
    /// fails after the record exists, the job is marked failed.
    pub async fn submit(&self, owner_id: &str, request: &SubmitRequest) -> ApiResult<Job> {
        let chain = request.validate_chain()?;
        let source = self.validate_source(&request.source_path).await?;

        for (stage, params) in &chain.parameters {
            for file in params.referenced_files() {
                resolve_under_root(&self.config.media_root, file).map_err(|e| {
                    ValidationError::invalid_parameter(*stage, format!("{}: {}", file, e))
                })?;
            }
        }

        let job = Job::new(owner_id, source, chain.stages, chain.parameters);
        self.store.insert(&job).await?;

        let first = job.stage_chain[0];
        let message = StageMessage::new(job.id.clone(), first);
        if let Err(e) = self.queue.enqueue(&message, &message.enter_key()).await {
            self.fail_unqueued(&job, &e.to_string()).await;
            return Err(ApiError::QueueUnavailable(e.to_string()));
        }

        info!(
            job_id = %job.id,
            owner_id = owner_id,
            stages = job.stage_chain.len(),
            "Job submitted"
        );
        metrics::record_job_submitted(first.as_str());
        Ok(job)
    }

    /// Job snapshot, visible to its owner and to admins.
    pub async fn get(&self, user: &AuthUser, id: &str) -> ApiResult<Job> {
        let job_id = JobId::parse(id).ok_or_else(|| ApiError::not_found("Job not found"))?;
        let job = self
            .store
            .get(&job_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Job not found"))?;

        if job.owner_id != user.owner_id && !user.is_admin {
            return Err(ApiError::forbidden("Job belongs to another user"));
        }
        Ok(job)
    }

    /// Most recent jobs of the caller.
    pub async fn list(&self, user: &AuthUser, limit: Option<usize>) -> ApiResult<Vec<Job>> {
        let limit = self.config.list_limit(limit);
        Ok(self.store.list_by_owner(&user.owner_id, limit).await?)
    }

    /// Cancel a job that has not finished. In-flight stages see the new
    /// status and drop their result.
    pub async fn cancel(&self, user: &AuthUser, id: &str) -> ApiResult<Job> {
        for _ in 0..MAX_CAS_ROUNDS {
            let job = self.get(user, id).await?;
            if job.is_terminal() {
                return Err(ApiError::conflict(format!("Job is already {}", job.status)));
            }

            let now = Utc::now();
            let mut canceled = job.clone();
            canceled.status = JobStatus::Canceled;
            canceled.lease = None;
            canceled.completed_at = Some(now);
            canceled.touch(now);

            if self.store.compare_and_swap(&canceled, job.revision).await? {
                info!(job_id = %job.id, "Job canceled");
                metrics::record_job_canceled();
                return Ok(canceled);
            }
        }
        Err(ApiError::conflict("Job is changing, try again"))
    }

    /// Resume a failed job at the stage that failed, with a fresh attempt
    /// budget for that stage.
    pub async fn retry(&self, user: &AuthUser, id: &str) -> ApiResult<Job> {
        for _ in 0..MAX_CAS_ROUNDS {
            let job = self.get(user, id).await?;
            if job.status != JobStatus::Failed {
                return Err(ApiError::conflict(format!(
                    "Only failed jobs can be retried, job is {}",
                    job.status
                )));
            }
            let Some(stage) = job.current_stage() else {
                return Err(ApiError::conflict("Job has no stage left to run"));
            };

            let now = Utc::now();
            let mut queued = job.clone();
            queued.status = JobStatus::Queued;
            queued.attempts.remove(&stage);
            queued.last_error = None;
            queued.lease = None;
            queued.completed_at = None;
            queued.touch(now);

            if !self.store.compare_and_swap(&queued, job.revision).await? {
                continue;
            }

            let message = StageMessage::new(queued.id.clone(), stage);
            let key = message.manual_retry_key(queued.revision);
            if let Err(e) = self.queue.enqueue(&message, &key).await {
                self.fail_unqueued(&queued, &e.to_string()).await;
                return Err(ApiError::QueueUnavailable(e.to_string()));
            }

            info!(job_id = %queued.id, stage = %stage, "Job retry requested");
            metrics::record_job_retried(stage.as_str());
            return Ok(queued);
        }
        Err(ApiError::conflict("Job is changing, try again"))
    }

    /// Path of the final media artifact of a succeeded job.
    pub async fn artifact(&self, user: &AuthUser, id: &str) -> ApiResult<PathBuf> {
        let job = self.get(user, id).await?;
        if job.status != JobStatus::Succeeded {
            return Err(ApiError::conflict(format!(
                "Job is {}, artifacts are available once it succeeds",
                job.status
            )));
        }
        job.final_artifact()
            .map(PathBuf::from)
            .ok_or_else(|| ApiError::not_found("Job produced no media artifact"))
    }

    /// Resolve the source under the media root and check it is a usable file.
    async fn validate_source(&self, relative: &str) -> ApiResult<PathBuf> {
        let path = resolve_under_root(&self.config.media_root, relative)
            .map_err(|e| ValidationError::invalid_source(e.to_string()))?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ValidationError::invalid_source(format!("{}: {}", relative, e)))?;
        if !meta.is_file() {
            let reason = format!("{} is not a regular file", relative);
            return Err(ValidationError::invalid_source(reason).into());
        }
        if meta.len() > self.config.max_source_bytes {
            return Err(ValidationError::SourceTooLarge {
                size: meta.len(),
                limit: self.config.max_source_bytes,
            }
            .into());
        }

        if self.config.validate_source_probe {
            let info = probe_video(&path).await.map_err(|e| {
                ValidationError::invalid_source(format!("{} is not readable media: {}", relative, e))
            })?;
            if info.duration <= 0.0 {
                let reason = format!("{} has no duration", relative);
                return Err(ValidationError::invalid_source(reason).into());
            }
        }

        Ok(path)
    }

    /// Record that the job could not be queued. Best effort: the caller
    /// already reports the queue failure.
    async fn fail_unqueued(&self, job: &Job, reason: &str) {
        let now = Utc::now();
        let mut failed = job.clone();
        failed.status = JobStatus::Failed;
        failed.last_error = Some(format!("enqueue failed: {}", reason));
        failed.completed_at = Some(now);
        failed.touch(now);

        match self.store.compare_and_swap(&failed, job.revision).await {
            Ok(true) => warn!(job_id = %job.id, "Job failed, could not enqueue: {}", reason),
            Ok(false) => warn!(job_id = %job.id, "Job changed before it could be marked failed"),
            Err(e) => warn!(job_id = %job.id, "Failed to mark unqueued job failed: {}", e),
        }
    }
}
