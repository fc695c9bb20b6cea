//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vedit_media::{StageAssets, WatermarkConfig};
use vedit_models::{StageDescriptor, StageName};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{BackoffPolicy, RetryPolicy};

/// Lease time granted past the engine timeout, covering publish and the
/// final write.
pub const LEASE_MARGIN: Duration = Duration::from_secs(60);

/// Shortest gap between keep-alives of a running delivery.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Execution settings of one stage served by this worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    pub descriptor: StageDescriptor,
    /// Consumer tasks in the stage's pool
    pub concurrency: usize,
}

impl StageSettings {
    pub fn stage(&self) -> StageName {
        self.descriptor.name
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name prefix within the queue consumer group
    pub worker_id: String,
    /// Root of the per-job output directories
    pub work_dir: PathBuf,
    /// Root that narration and music paths are resolved against
    pub media_root: PathBuf,
    /// Overlay applied by `finalize` when requested
    pub watermark: WatermarkConfig,
    /// Stages this process consumes
    pub stages: Vec<StageSettings>,
    pub backoff: BackoffPolicy,
    /// Wall-clock budget of a whole pipeline, measured from submission
    pub pipeline_max_duration: Duration,
    /// Remove the job's work directory when it fails or is canceled
    pub cleanup_on_failure: bool,
    /// How long one queue read waits for a message
    pub consume_block: Duration,
    /// How often delayed retries are moved to their queues
    pub promote_interval: Duration,
    /// How often the worker should scan for orphaned pending messages
    pub claim_interval: Duration,
    /// Minimum idle time before a pending message can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Port for the Prometheus scrape endpoint, disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            work_dir: PathBuf::from("/tmp/vedit"),
            media_root: PathBuf::from("/srv/media"),
            watermark: WatermarkConfig::default(),
            stages: StageName::ALL
                .iter()
                .map(|stage| StageSettings {
                    descriptor: stage.descriptor(),
                    concurrency: 1,
                })
                .collect(),
            backoff: BackoffPolicy::default(),
            pipeline_max_duration: Duration::from_secs(6 * 3600),
            cleanup_on_failure: false,
            consume_block: Duration::from_secs(1),
            promote_interval: Duration::from_secs(1),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            shutdown_timeout: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Per-stage overrides use the upper-case stage name:
    /// `STAGE_ADD_MUSIC_CONCURRENCY`, `STAGE_EXPORT_MAX_ATTEMPTS`,
    /// `STAGE_CUT_TIMEOUT_SECS`.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let served = match std::env::var("WORKER_STAGES") {
            Ok(list) if !list.trim().is_empty() => parse_stage_list(&list)?,
            _ => StageName::ALL.to_vec(),
        };
        let default_concurrency: usize = env_or("WORKER_STAGE_CONCURRENCY", 1);

        let stages = served
            .into_iter()
            .map(|stage| stage_settings_from_env(stage, default_concurrency))
            .collect();

        let metrics_port = std::env::var("WORKER_METRICS_PORT")
            .ok()
            .and_then(|s| s.parse().ok());

        Ok(Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            media_root: std::env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            watermark: WatermarkConfig::from_env(),
            stages,
            backoff: BackoffPolicy::new(
                Duration::from_secs(env_or("WORKER_BACKOFF_BASE_SECS", 5)),
                Duration::from_secs(env_or("WORKER_BACKOFF_MAX_SECS", 300)),
            ),
            pipeline_max_duration: Duration::from_secs(env_or(
                "PIPELINE_MAX_DURATION",
                defaults.pipeline_max_duration.as_secs(),
            )),
            cleanup_on_failure: env_or("WORKER_CLEANUP_ON_FAILURE", false),
            consume_block: Duration::from_millis(env_or("WORKER_CONSUME_BLOCK_MS", 1000)),
            promote_interval: Duration::from_millis(env_or("QUEUE_PROMOTE_INTERVAL", 1000)),
            claim_interval: Duration::from_secs(env_or("WORKER_CLAIM_INTERVAL_SECS", 30)),
            claim_min_idle: Duration::from_secs(env_or("WORKER_CLAIM_MIN_IDLE_SECS", 300)),
            shutdown_timeout: Duration::from_secs(env_or("WORKER_SHUTDOWN_TIMEOUT", 30)),
            metrics_port,
        })
    }

    /// Settings of a served stage.
    pub fn stage(&self, stage: StageName) -> Option<&StageSettings> {
        self.stages.iter().find(|s| s.stage() == stage)
    }

    pub fn served_stages(&self) -> Vec<StageName> {
        self.stages.iter().map(StageSettings::stage).collect()
    }

    /// Retry policy of a stage. Stages not served here use built-in defaults.
    pub fn retry_policy(&self, stage: StageName) -> RetryPolicy {
        let max_attempts = self
            .stage(stage)
            .map(|s| s.descriptor.max_attempts)
            .unwrap_or_else(|| stage.descriptor().max_attempts);
        RetryPolicy::new(max_attempts, self.backoff)
    }

    /// Engine timeout of a stage.
    pub fn stage_timeout(&self, stage: StageName) -> Duration {
        self.stage(stage)
            .map(|s| s.descriptor.timeout)
            .unwrap_or_else(|| stage.descriptor().timeout)
    }

    /// How long a started attempt holds the job against other deliveries.
    pub fn lease_ttl(&self, stage: StageName) -> Duration {
        self.stage_timeout(stage) + LEASE_MARGIN
    }

    /// Keep-alive period of a running delivery, well inside `claim_min_idle`.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.claim_min_idle / 3).max(MIN_HEARTBEAT)
    }

    /// Files stages may read besides their upstream input.
    pub fn stage_assets(&self) -> StageAssets {
        StageAssets::new(self.media_root.clone(), self.watermark.clone())
    }

    /// Directory holding every artifact of one job.
    pub fn job_dir(&self, job_id: &vedit_models::JobId) -> PathBuf {
        self.work_dir.join(job_id.as_str())
    }

    /// Replace the settings of one stage, adding it if it was not served.
    pub fn with_stage(mut self, settings: StageSettings) -> Self {
        self.stages.retain(|s| s.stage() != settings.stage());
        self.stages.push(settings);
        self
    }
}

fn stage_settings_from_env(stage: StageName, default_concurrency: usize) -> StageSettings {
    let key = stage.env_key();
    let mut descriptor = stage.descriptor();

    if let Some(max_attempts) = env_opt::<u32>(&format!("STAGE_{}_MAX_ATTEMPTS", key)) {
        descriptor = descriptor.with_max_attempts(max_attempts);
    }
    if let Some(secs) = env_opt::<u64>(&format!("STAGE_{}_TIMEOUT_SECS", key)) {
        descriptor = descriptor.with_timeout(Duration::from_secs(secs));
    }
    let concurrency = env_opt::<usize>(&format!("STAGE_{}_CONCURRENCY", key))
        .unwrap_or(default_concurrency)
        .max(1);

    StageSettings {
        descriptor,
        concurrency,
    }
}

fn parse_stage_list(list: &str) -> WorkerResult<Vec<StageName>> {
    let mut stages = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let stage = StageName::from_str(name)
            .map_err(|e| WorkerError::config_error(format!("WORKER_STAGES: {}", e)))?;
        if !stages.contains(&stage) {
            stages.push(stage);
        }
    }
    Ok(stages)
}

fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_serves_every_stage() {
        let config = WorkerConfig::default();
        assert_eq!(config.served_stages().len(), StageName::ALL.len());
        assert_eq!(
            config.stage_timeout(StageName::Thumbnail),
            Duration::from_secs(120)
        );
        assert_eq!(config.retry_policy(StageName::Cut).max_attempts, 3);
    }

    #[test]
    fn test_heartbeat_inside_claim_window() {
        let mut config = WorkerConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(100));
        assert_eq!(
            config.lease_ttl(StageName::Thumbnail),
            Duration::from_secs(180)
        );

        config.claim_min_idle = Duration::from_millis(100);
        assert!(config.heartbeat_interval() < config.claim_min_idle);
        config.claim_min_idle = Duration::ZERO;
        assert_eq!(config.heartbeat_interval(), MIN_HEARTBEAT);
    }

    #[test]
    fn test_parse_stage_list() {
        let stages = parse_stage_list("cut, export,cut,add_music").unwrap();
        assert_eq!(
            stages,
            vec![StageName::Cut, StageName::Export, StageName::AddMusic]
        );

        let err = parse_stage_list("cut,transmogrify").unwrap_err();
        assert!(matches!(err, WorkerError::ConfigError(_)));
    }

    #[test]
    fn test_with_stage_overrides() {
        let config = WorkerConfig::default().with_stage(StageSettings {
            descriptor: StageName::Compression
                .descriptor()
                .with_max_attempts(5)
                .with_timeout(Duration::from_secs(7)),
            concurrency: 4,
        });

        assert_eq!(config.retry_policy(StageName::Compression).max_attempts, 5);
        assert_eq!(
            config.stage_timeout(StageName::Compression),
            Duration::from_secs(7)
        );
        assert_eq!(config.stage(StageName::Compression).unwrap().concurrency, 4);
        assert_eq!(config.served_stages().len(), StageName::ALL.len());
    }
}
