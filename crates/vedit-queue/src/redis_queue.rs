//! Stage queues on Redis Streams.
//!
//! Layout:
//! - `vedit:stage:<name>`: one stream per stage, one consumer group shared by
//!   all workers of that stage
//! - `vedit:delayed:<name>`: sorted set of payloads scored by due time (ms)
//! - `vedit:dedup:<key>`: `SET NX EX` guard per transition

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamPendingReply, StreamReadReply};
use redis::{AsyncCommands, AsyncConnectionConfig, Script};
use tracing::{debug, info, warn};
use vedit_models::{StageMessage, StageName};

use crate::backend::{Delivery, EnqueueOutcome, QueueDepth, StageQueue};
use crate::error::{QueueError, QueueResult};

const PAYLOAD_FIELD: &str = "job";

/// Moves due members of each delayed set into the paired stream.
/// KEYS come in pairs: delayed set, stream.
const PROMOTE_SCRIPT: &str = r#"
local moved = 0
for i = 1, #KEYS, 2 do
    local due = redis.call('ZRANGEBYSCORE', KEYS[i], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
    for _, payload in ipairs(due) do
        redis.call('ZREM', KEYS[i], payload)
        redis.call('XADD', KEYS[i + 1], '*', ARGV[3], payload)
        moved = moved + 1
    end
end
return moved
"#;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Consumer group name, shared by every stage stream
    pub consumer_group: String,
    /// Prefix of dedup keys
    pub dedup_prefix: String,
    /// Lifetime of dedup keys
    pub dedup_ttl: Duration,
    /// Prefix of per-stage delayed sets
    pub delayed_prefix: String,
    /// Max delayed entries moved per stage per promote call
    pub promote_batch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            consumer_group: "vedit:workers".to_string(),
            dedup_prefix: "vedit:dedup:".to_string(),
            dedup_ttl: Duration::from_secs(86400), // 24 hours
            delayed_prefix: "vedit:delayed:".to_string(),
            promote_batch: 100,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dedup_prefix: defaults.dedup_prefix,
            dedup_ttl: Duration::from_secs(
                std::env::var("QUEUE_DEDUP_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86400),
            ),
            delayed_prefix: defaults.delayed_prefix,
            promote_batch: std::env::var("QUEUE_PROMOTE_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.promote_batch),
        }
    }

    fn dedup_key(&self, key: &str) -> String {
        format!("{}{}", self.dedup_prefix, key)
    }

    fn delayed_key(&self, stage: StageName) -> String {
        format!("{}{}", self.delayed_prefix, stage)
    }
}

/// Redis Streams implementation of [`StageQueue`].
pub struct RedisStageQueue {
    client: redis::Client,
    config: QueueConfig,
    promote: Script,
}

impl RedisStageQueue {
    /// Create a new queue client. Does not connect yet.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            promote: Script::new(PROMOTE_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Connection whose response timeout outlasts a blocking read.
    async fn blocking_conn(&self, block: Duration) -> QueueResult<MultiplexedConnection> {
        let config = AsyncConnectionConfig::new()
            .set_response_timeout(block + Duration::from_secs(5));
        self.client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Take a dedup key. Returns false when it is already held.
    async fn claim_dedup(&self, conn: &mut MultiplexedConnection, key: &str) -> QueueResult<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.config.dedup_key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async(conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Give a dedup key back after a failed write so the caller can retry.
    async fn release_dedup(&self, conn: &mut MultiplexedConnection, key: &str) {
        if let Err(e) = conn.del::<_, ()>(self.config.dedup_key(key)).await {
            warn!("Failed to release dedup key {}: {}", key, e);
        }
    }

    /// Decode stream entries; malformed or mismatched payloads are acked and dropped.
    async fn decode_entries(&self, stage: StageName, entries: Vec<StreamId>) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(entries.len());

        for entry in entries {
            let parsed = match entry.map.get(PAYLOAD_FIELD) {
                Some(redis::Value::BulkString(payload)) => {
                    serde_json::from_slice::<StageMessage>(payload).map_err(|e| e.to_string())
                }
                _ => Err("missing payload field".to_string()),
            };

            match parsed {
                Ok(message) if message.stage == stage => {
                    deliveries.push(Delivery {
                        id: entry.id,
                        message,
                    });
                }
                Ok(message) => {
                    warn!(
                        "Dropping message for stage {} found on {} queue",
                        message.stage, stage
                    );
                    self.ack_raw(stage, &entry.id).await.ok();
                }
                Err(e) => {
                    warn!("Failed to parse stage message {}: {}", entry.id, e);
                    // Ack the malformed message to prevent reprocessing
                    self.ack_raw(stage, &entry.id).await.ok();
                }
            }
        }

        deliveries
    }

    async fn ack_raw(&self, stage: StageName, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let stream = stage.queue_name();

        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(message_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message {} on {}", message_id, stream);
        Ok(())
    }
}

#[async_trait]
impl StageQueue for RedisStageQueue {
    async fn init(&self, stages: &[StageName]) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        for stage in stages {
            let stream = stage.queue_name();
            // Create consumer group (ignore error if already exists)
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(_) => info!("Created consumer group {} on {}", self.config.consumer_group, stream),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!("Consumer group already exists on {}", stream);
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }

        Ok(())
    }

    async fn enqueue(
        &self,
        message: &StageMessage,
        dedup_key: &str,
    ) -> QueueResult<EnqueueOutcome> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(message)?;

        if !self.claim_dedup(&mut conn, dedup_key).await? {
            debug!("Duplicate enqueue suppressed: {}", dedup_key);
            return Ok(EnqueueOutcome::Duplicate);
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(message.stage.queue_name())
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await;

        match added {
            Ok(message_id) => {
                info!(
                    "Enqueued job {} on {} with message ID {}",
                    message.job_id,
                    message.stage.queue_name(),
                    message_id
                );
                Ok(EnqueueOutcome::Enqueued)
            }
            Err(e) => {
                self.release_dedup(&mut conn, dedup_key).await;
                Err(QueueError::enqueue_failed(message.stage, e.to_string()))
            }
        }
    }

    async fn enqueue_delayed(
        &self,
        message: &StageMessage,
        delay: Duration,
        dedup_key: &str,
    ) -> QueueResult<EnqueueOutcome> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(message)?;

        if !self.claim_dedup(&mut conn, dedup_key).await? {
            debug!("Duplicate delayed enqueue suppressed: {}", dedup_key);
            return Ok(EnqueueOutcome::Duplicate);
        }

        let due_ms = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let added: Result<(), redis::RedisError> = conn
            .zadd(self.config.delayed_key(message.stage), &payload, due_ms)
            .await;

        match added {
            Ok(()) => {
                info!(
                    "Scheduled job {} on {} in {:?}",
                    message.job_id, message.stage, delay
                );
                Ok(EnqueueOutcome::Enqueued)
            }
            Err(e) => {
                self.release_dedup(&mut conn, dedup_key).await;
                Err(QueueError::enqueue_failed(message.stage, e.to_string()))
            }
        }
    }

    async fn promote_due(&self, stages: &[StageName]) -> QueueResult<usize> {
        if stages.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;

        let mut invocation = self.promote.prepare_invoke();
        for stage in stages {
            invocation
                .key(self.config.delayed_key(*stage))
                .key(stage.queue_name());
        }
        let moved: usize = invocation
            .arg(chrono::Utc::now().timestamp_millis())
            .arg(self.config.promote_batch)
            .arg(PAYLOAD_FIELD)
            .invoke_async(&mut conn)
            .await?;

        if moved > 0 {
            debug!("Promoted {} delayed messages", moved);
        }
        Ok(moved)
    }

    async fn consume(
        &self,
        stage: StageName,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.blocking_conn(block).await?;

        // Read from consumer group
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stage.queue_name())
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let entries = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        Ok(self.decode_entries(stage, entries).await)
    }

    async fn claim_stale(
        &self,
        stage: StageName,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;

        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(stage.queue_name())
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        // Entries trimmed from the stream while pending carry no payload.
        for id in &reply.deleted_ids {
            self.ack_raw(stage, id).await.ok();
        }

        let deliveries = self.decode_entries(stage, reply.claimed).await;
        for delivery in &deliveries {
            info!(
                "Claimed pending job {} from {}",
                delivery.message.job_id,
                stage.queue_name()
            );
        }
        Ok(deliveries)
    }

    async fn keep_alive(&self, delivery: &Delivery, consumer: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        // XCLAIM with min-idle 0 resets the idle clock; JUSTID leaves the
        // delivery counter alone. Acked ids are skipped by the server.
        let _: Vec<String> = redis::cmd("XCLAIM")
            .arg(delivery.stage().queue_name())
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(0)
            .arg(&delivery.id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ack_raw(delivery.stage(), &delivery.id).await
    }

    async fn depth(&self, stage: StageName) -> QueueResult<QueueDepth> {
        let mut conn = self.conn().await?;
        let stream = stage.queue_name();

        // Acked entries are deleted, so the stream holds ready + pending.
        let len: u64 = conn.xlen(&stream).await?;
        let pending: Result<StreamPendingReply, redis::RedisError> = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await;
        let pending = match pending {
            Ok(reply) => reply.count() as u64,
            Err(e) if e.to_string().contains("NOGROUP") => 0,
            Err(e) => return Err(QueueError::Redis(e)),
        };
        let delayed: u64 = conn.zcard(self.config.delayed_key(stage)).await?;

        Ok(QueueDepth {
            ready: len.saturating_sub(pending),
            pending,
            delayed,
        })
    }

    async fn ping(&self) -> QueueResult<()> {
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
        let config = QueueConfig::default();
        assert_eq!(config.dedup_key("enter:j:cut"), "vedit:dedup:enter:j:cut");
        assert_eq!(
            config.delayed_key(StageName::AddMusic),
            "vedit:delayed:add-music"
        );
        assert_eq!(config.dedup_ttl, Duration::from_secs(86400));
    }

    #[test]
    fn test_client_open_does_not_connect() {
        let queue = RedisStageQueue::new(QueueConfig {
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..QueueConfig::default()
        });
        assert!(queue.is_ok());
        assert!(RedisStageQueue::new(QueueConfig {
            redis_url: "not a url".to_string(),
            ..QueueConfig::default()
        })
        .is_err());
    }
}
