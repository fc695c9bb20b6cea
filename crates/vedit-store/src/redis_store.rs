//! Job records in Redis.
//!
//! - `vedit:job:<id>`: job JSON
//! - `vedit:owner:<owner>:jobs`: sorted set of job ids scored by creation time

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};
use vedit_models::{Job, JobId};

use crate::backend::JobStore;
use crate::error::{StoreError, StoreResult};

/// Create the record and index it atomically.
const INSERT_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
    return 1
end
return 0
"#;

/// Replace the record only if the stored revision matches.
/// Returns -1 when missing, 0 on mismatch, 1 when written.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
local doc = cjson.decode(current)
if tonumber(doc['revision'] or 0) ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix of every key the store writes
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vedit".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("STORE_REDIS_URL")
                .or_else(|_| std::env::var("REDIS_URL"))
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "vedit".to_string()),
        }
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    fn owner_key(&self, owner_id: &str) -> String {
        format!("{}:owner:{}:jobs", self.key_prefix, owner_id)
    }
}

/// Redis implementation of [`JobStore`].
pub struct RedisJobStore {
    client: redis::Client,
    config: StoreConfig,
    insert: Script,
    cas: Script,
}

impl RedisJobStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            insert: Script::new(INSERT_SCRIPT),
            cas: Script::new(CAS_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    async fn conn(&self) -> StoreResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))
    }

    fn decode(id: &str, raw: &str) -> StoreResult<Job> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &Job) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(job)?;

        let created: i64 = self
            .insert
            .key(self.config.job_key(&job.id))
            .key(self.config.owner_key(&job.owner_id))
            .arg(payload)
            .arg(job.created_at.timestamp_millis())
            .arg(job.id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        debug!("Created job record {}", job.id);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(self.config.job_key(id)).await?;
        raw.map(|raw| Self::decode(id.as_str(), &raw)).transpose()
    }

    async fn compare_and_swap(&self, job: &Job, expected_revision: u64) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(job)?;

        let result: i64 = self
            .cas
            .key(self.config.job_key(&job.id))
            .arg(expected_revision)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        match result {
            1 => Ok(true),
            0 => {
                debug!(
                    "Revision conflict on job {} (expected {})",
                    job.id, expected_revision
                );
                Ok(false)
            }
            _ => Err(StoreError::not_found(job.id.to_string())),
        }
    }

    async fn list_by_owner(&self, owner_id: &str, limit: usize) -> StoreResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;

        let ids: Vec<String> = conn
            .zrevrange(self.config.owner_key(owner_id), 0, limit as isize - 1)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.config.job_key(&JobId::from_string(id.clone())))
            .collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(raws.len());
        for (id, raw) in ids.iter().zip(raws) {
            match raw {
                Some(raw) => jobs.push(Self::decode(id, &raw)?),
                None => warn!("Owner index references missing job {}", id),
            }
        }
        Ok(jobs)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let config = StoreConfig::default();
        let id = JobId::from_string("abc");
        assert_eq!(config.job_key(&id), "vedit:job:abc");
        assert_eq!(config.owner_key("user-1"), "vedit:owner:user-1:jobs");
    }
}
