//! Stage executor: one consumer pool per served stage plus the delayed
//! promoter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use vedit_media::TranscodeEngine;
use vedit_models::StageName;
use vedit_queue::{Delivery, StageQueue};
use vedit_store::JobStore;

use crate::config::{StageSettings, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::handler::StageHandler;
use crate::metrics;
use crate::retry::FailureTracker;

/// Runs the stage pools until shutdown or an infrastructure failure.
pub struct StageExecutor {
    config: Arc<WorkerConfig>,
    queue: Arc<dyn StageQueue>,
    handler: Arc<StageHandler>,
    shutdown: watch::Sender<bool>,
}

/// Everything one stage pool needs.
struct StagePool {
    settings: StageSettings,
    consumer: String,
    config: Arc<WorkerConfig>,
    queue: Arc<dyn StageQueue>,
    handler: Arc<StageHandler>,
    fatal: mpsc::UnboundedSender<WorkerError>,
}

impl StageExecutor {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn StageQueue>,
        engine: Arc<dyn TranscodeEngine>,
    ) -> Self {
        let config = Arc::new(config);
        let handler = Arc::new(StageHandler::new(
            Arc::clone(&config),
            store,
            Arc::clone(&queue),
            engine,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            queue,
            handler,
            shutdown,
        }
    }

    /// Run until [`shutdown`](Self::shutdown) is called or a store/queue
    /// error stops a pool. The latter is returned so the process can exit
    /// non-zero.
    pub async fn run(&self) -> WorkerResult<()> {
        let stages = self.config.served_stages();
        if stages.is_empty() {
            return Err(WorkerError::config_error("no stages to serve"));
        }

        info!(
            "Starting stage executor '{}' for {} stages",
            self.config.worker_id,
            stages.len()
        );

        self.queue.init(&stages).await?;

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for settings in &self.config.stages {
            info!(
                stage = %settings.stage(),
                concurrency = settings.concurrency,
                max_attempts = settings.descriptor.max_attempts,
                timeout_secs = settings.descriptor.timeout.as_secs(),
                "Starting stage pool"
            );
            let pool = StagePool {
                settings: settings.clone(),
                consumer: self.config.worker_id.clone(),
                config: Arc::clone(&self.config),
                queue: Arc::clone(&self.queue),
                handler: Arc::clone(&self.handler),
                fatal: fatal_tx.clone(),
            };
            tasks.spawn(pool.run(self.shutdown.subscribe()));
        }

        tasks.spawn(run_promoter(
            Arc::clone(&self.queue),
            stages,
            self.config.promote_interval,
            self.shutdown.subscribe(),
        ));
        drop(fatal_tx);

        let mut shutdown_rx = self.shutdown.subscribe();
        let failure = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("Shutdown signal received, stopping executor");
                None
            }
            Some(err) = fatal_rx.recv() => {
                error!("Stopping executor after infrastructure error: {}", err);
                Some(err)
            }
        };
        let _ = self.shutdown.send(true);

        info!("Waiting for in-flight stages to complete...");
        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!("Shutdown timeout elapsed, aborting in-flight stages");
            tasks.abort_all();
        }

        info!("Stage executor stopped");
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl StagePool {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let stage = self.settings.stage();
        let capacity = self.settings.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(capacity));
        let mut inflight = JoinSet::new();
        let mut claim_tracker = FailureTracker::new(3);
        // Claim right away so messages orphaned by a previous crash resume
        let mut next_claim = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }
            while inflight.try_join_next().is_some() {}

            let available = semaphore.available_permits();
            if available == 0 {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = inflight.join_next() => {}
                }
                continue;
            }

            let deliveries = if Instant::now() >= next_claim {
                next_claim = Instant::now() + self.config.claim_interval;
                match self
                    .queue
                    .claim_stale(stage, &self.consumer, self.config.claim_min_idle, available)
                    .await
                {
                    Ok(claimed) => {
                        claim_tracker.record_success();
                        if !claimed.is_empty() {
                            info!(stage = %stage, "Claimed {} stale messages", claimed.len());
                            metrics::record_claimed(stage.as_str(), claimed.len());
                        }
                        claimed
                    }
                    Err(e) => {
                        if claim_tracker.record_failure() {
                            warn!(stage = %stage, "Failed to claim stale messages: {}", e);
                        }
                        Vec::new()
                    }
                }
            } else {
                match self
                    .queue
                    .consume(stage, &self.consumer, self.config.consume_block, available)
                    .await
                {
                    Ok(deliveries) => deliveries,
                    Err(e) => {
                        let _ = self.fatal.send(e.into());
                        break;
                    }
                }
            };

            if !deliveries.is_empty() {
                debug!(stage = %stage, "Received {} messages", deliveries.len());
            }

            for delivery in deliveries {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let handler = Arc::clone(&self.handler);
                let fatal = self.fatal.clone();
                inflight.spawn(async move {
                    let _permit = permit;
                    dispatch(handler, delivery, fatal).await;
                });
            }
        }

        while inflight.join_next().await.is_some() {}
        debug!(stage = %stage, "Stage pool stopped");
    }
}

async fn dispatch(
    handler: Arc<StageHandler>,
    delivery: Delivery,
    fatal: mpsc::UnboundedSender<WorkerError>,
) {
    match handler.handle(&delivery).await {
        Ok(outcome) => debug!(
            job_id = %delivery.message.job_id,
            stage = %delivery.stage(),
            ?outcome,
            "Delivery handled"
        ),
        Err(e) => {
            error!(
                job_id = %delivery.message.job_id,
                stage = %delivery.stage(),
                "Delivery left unacked: {}", e
            );
            let _ = fatal.send(e);
        }
    }
}

/// Move due delayed retries into their stage queues.
async fn run_promoter(
    queue: Arc<dyn StageQueue>,
    stages: Vec<StageName>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    let mut tracker = FailureTracker::new(3);

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = interval.tick() => {
                match queue.promote_due(&stages).await {
                    Ok(0) => tracker.record_success(),
                    Ok(moved) => {
                        tracker.record_success();
                        debug!("Promoted {} delayed messages", moved);
                        metrics::record_promoted(moved);
                    }
                    Err(e) => {
                        if tracker.record_failure() {
                            warn!("Failed to promote delayed messages: {}", e);
                        }
                    }
                }
            }
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
