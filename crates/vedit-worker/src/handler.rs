//! Handling of one delivered `{job, stage}` message.
//!
//! 1. Load the job and run admission.
//! 2. Mark it running and take the stage lease with a compare-and-swap.
//! 3. Run the engine from the upstream input to the stage's output path,
//!    keeping the delivery alive in the queue meanwhile.
//! 4. Persist the transition, then enqueue what follows.
//! 5. Ack.
//!
//! A lost compare-and-swap reloads the record and starts over at admission.
//! A delivery arriving while another handler holds the lease stays pending.
//! Store and queue errors are returned without acking so the message is
//! redelivered after the process restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, Instrument};
use uuid::Uuid;
use vedit_media::{
    build_stage_command, partial_path, publish_output, remove_dir_best_effort, MediaError,
    StageAssets, TranscodeEngine,
};
use vedit_models::{Job, JobStatus, StageMessage, StageName};
use vedit_queue::{Delivery, StageQueue};
use vedit_store::JobStore;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::transition::{
    admit, expire, mark_running, transition, Admission, NextAction, StageOutcome,
    DEADLINE_EXCEEDED,
};

/// Rounds of reload-and-readmit before the delivery is left for redelivery.
const MAX_CAS_ROUNDS: usize = 5;

/// What handling a delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Artifact recorded and the next stage enqueued
    Advanced,
    /// Last stage done, job succeeded
    Completed,
    /// Attempt failed, delayed redelivery scheduled
    RetryScheduled,
    /// Attempt failed for good, job failed
    Failed,
    /// Stale, duplicate or canceled delivery dropped
    Discarded,
    /// Lost next-stage enqueue repeated
    Recovered,
    /// Pipeline deadline passed, job failed
    Expired,
    /// Kept losing compare-and-swap; left unacked for redelivery
    Deferred,
    /// Another handler is running the stage; left unacked
    Leased,
}

/// Runs stage deliveries against the store, the queue and the engine.
pub struct StageHandler {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn StageQueue>,
    engine: Arc<dyn TranscodeEngine>,
    assets: StageAssets,
    config: Arc<WorkerConfig>,
}

impl StageHandler {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn StageQueue>,
        engine: Arc<dyn TranscodeEngine>,
    ) -> Self {
        Self {
            assets: config.stage_assets(),
            store,
            queue,
            engine,
            config,
        }
    }

    /// Handle one delivery. `Err` means infrastructure failure; the message
    /// was not acked.
    pub async fn handle(&self, delivery: &Delivery) -> WorkerResult<HandleOutcome> {
        let logger = JobLogger::new(&delivery.message.job_id, delivery.stage());
        let span = logger.create_span();
        self.handle_delivery(delivery, &logger).instrument(span).await
    }

    async fn handle_delivery(
        &self,
        delivery: &Delivery,
        logger: &JobLogger,
    ) -> WorkerResult<HandleOutcome> {
        let stage = delivery.stage();
        let job_id = &delivery.message.job_id;
        let holder = format!("{}/{}", self.config.worker_id, Uuid::new_v4());
        // Output of an attempt whose result could not be recorded
        let mut orphaned: Option<PathBuf> = None;

        for _ in 0..MAX_CAS_ROUNDS {
            let Some(job) = self.store.get(job_id).await? else {
                logger.log_warning("job record missing, dropping message");
                self.queue.ack(delivery).await?;
                return Ok(HandleOutcome::Discarded);
            };

            let now = Utc::now();
            match admit(&job, stage, &holder, now, self.config.pipeline_max_duration) {
                Admission::Discard(reason) => {
                    debug!(reason, status = %job.status, "Discarding delivery");
                    if let Some(path) = orphaned.take() {
                        self.discard_orphan(&job, stage, &path).await;
                    }
                    if matches!(job.status, JobStatus::Canceled | JobStatus::Failed) {
                        self.cleanup(&job).await;
                    }
                    metrics::record_stage_discarded(stage.as_str(), reason);
                    self.queue.ack(delivery).await?;
                    return Ok(HandleOutcome::Discarded);
                }
                Admission::Recover(next) => {
                    let message = StageMessage::new(job.id.clone(), next);
                    self.queue.enqueue(&message, &message.enter_key()).await?;
                    logger.log_progress(&format!("re-enqueued next stage {}", next));
                    self.queue.ack(delivery).await?;
                    return Ok(HandleOutcome::Recovered);
                }
                Admission::Expired => {
                    let failed = expire(&job, now);
                    if !self.store.compare_and_swap(&failed, job.revision).await? {
                        continue;
                    }
                    logger.log_error(DEADLINE_EXCEEDED);
                    metrics::record_job_failed(stage.as_str());
                    self.cleanup(&failed).await;
                    self.queue.ack(delivery).await?;
                    return Ok(HandleOutcome::Expired);
                }
                Admission::Leased => {
                    debug!(status = %job.status, "Stage is leased to another handler");
                    return Ok(HandleOutcome::Leased);
                }
                Admission::Process => {}
            }

            let running = mark_running(&job, stage, &holder, now, self.config.lease_ttl(stage));
            if !self.store.compare_and_swap(&running, job.revision).await? {
                continue;
            }

            let outcome = self.execute_alive(delivery, &running, stage, logger).await;
            let policy = self.config.retry_policy(stage);
            let (next, action) = transition(&running, stage, outcome, &policy, Utc::now());

            if !self.store.compare_and_swap(&next, running.revision).await? {
                logger.log_warning("job changed while the stage ran, re-checking");
                orphaned = next.artifact_paths.get(&stage).cloned();
                continue;
            }

            return self.follow_up(delivery, &next, action, logger).await;
        }

        logger.log_warning("gave up after repeated write conflicts, leaving for redelivery");
        Ok(HandleOutcome::Deferred)
    }

    /// Enqueue what the persisted transition asks for, then ack.
    async fn follow_up(
        &self,
        delivery: &Delivery,
        job: &Job,
        action: NextAction,
        logger: &JobLogger,
    ) -> WorkerResult<HandleOutcome> {
        let outcome = match action {
            NextAction::Enqueue(following) => {
                let message = StageMessage::new(job.id.clone(), following);
                self.queue.enqueue(&message, &message.enter_key()).await?;
                logger.log_progress(&format!("enqueued {}", following));
                HandleOutcome::Advanced
            }
            NextAction::Complete => {
                logger.log_completion("pipeline succeeded");
                metrics::record_job_completed();
                HandleOutcome::Completed
            }
            NextAction::Retry { stage, delay } => {
                let message = StageMessage::new(job.id.clone(), stage);
                self.queue
                    .enqueue_delayed(&message, delay, &message.retry_key(job.revision))
                    .await?;
                logger.log_warning(&format!(
                    "attempt {} failed, retrying in {:?}",
                    job.attempts_for(stage),
                    delay
                ));
                metrics::record_stage_retry(stage.as_str());
                HandleOutcome::RetryScheduled
            }
            NextAction::Fail(reason) => {
                logger.log_error(&reason);
                metrics::record_job_failed(delivery.stage().as_str());
                self.cleanup(job).await;
                HandleOutcome::Failed
            }
        };

        self.queue.ack(delivery).await?;
        Ok(outcome)
    }

    /// `execute` while resetting the delivery's idle time every
    /// heartbeat, so `claim_stale` does not hand it to another consumer.
    async fn execute_alive(
        &self,
        delivery: &Delivery,
        job: &Job,
        stage: StageName,
        logger: &JobLogger,
    ) -> StageOutcome {
        let work = self.execute(job, stage, logger);
        tokio::pin!(work);

        let period = self.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outcome = &mut work => return outcome,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.queue.keep_alive(delivery, &self.config.worker_id).await {
                        logger.log_warning(&format!("keep-alive failed: {}", e));
                    }
                }
            }
        }
    }

    /// Run the engine for `stage` and publish its output.
    async fn execute(&self, job: &Job, stage: StageName, logger: &JobLogger) -> StageOutcome {
        let Some(params) = job.params_for(stage) else {
            return StageOutcome::permanent(format!("no parameters recorded for {}", stage));
        };

        let job_dir = self.config.job_dir(&job.id);
        let output = stage_output_path(&job_dir, job, stage, params.output_extension());
        let partial = partial_path(&output);
        let input = job.upstream_input();

        if let Err(e) = tokio::fs::create_dir_all(&job_dir).await {
            return StageOutcome::failed(format!("cannot create work directory: {}", e));
        }

        let cmd = match build_stage_command(params, input, &partial, &self.assets) {
            Ok(cmd) => cmd,
            Err(e) => return classify(e),
        };

        logger.log_start(&format!(
            "attempt {} on {}",
            job.attempts_for(stage) + 1,
            input.display()
        ));
        let started = Instant::now();
        let result = match self
            .engine
            .run(&cmd, self.config.stage_timeout(stage))
            .await
        {
            Ok(()) => publish_output(&partial, &output).await,
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                metrics::record_stage_run(stage.as_str(), "success", elapsed);
                logger.log_completion(&format!("{} in {:.1}s", output.display(), elapsed));
                StageOutcome::succeeded(output)
            }
            Err(e) => {
                let label = if matches!(e, MediaError::Timeout(_)) {
                    "timeout"
                } else {
                    "failure"
                };
                metrics::record_stage_run(stage.as_str(), label, elapsed);
                logger.log_error(&e.to_string());
                let _ = tokio::fs::remove_file(&partial).await;
                classify(e)
            }
        }
    }

    /// Remove an output the record never adopted.
    async fn discard_orphan(&self, job: &Job, stage: StageName, path: &Path) {
        if job.artifact_paths.get(&stage).map(PathBuf::as_path) == Some(path) {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Could not remove discarded output {}: {}", path.display(), e);
        }
    }

    async fn cleanup(&self, job: &Job) {
        if self.config.cleanup_on_failure {
            remove_dir_best_effort(&self.config.job_dir(&job.id)).await;
        }
    }
}

/// Deterministic output path: `<work_dir>/<jobId>/<jobId>-<stage>.<ext>`.
pub fn stage_output_path(job_dir: &Path, job: &Job, stage: StageName, extension: &str) -> PathBuf {
    job_dir.join(format!("{}-{}.{}", job.id, stage, extension))
}

fn classify(error: MediaError) -> StageOutcome {
    if error.is_engine_failure() {
        StageOutcome::failed(error.reason())
    } else {
        StageOutcome::permanent(error.reason())
    }
}
