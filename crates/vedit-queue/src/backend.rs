//! The queue abstraction the API and workers program against.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use vedit_models::{StageMessage, StageName};

use crate::error::QueueResult;

/// A message handed to a consumer. Stays pending until acked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend message id (stream entry id for Redis)
    pub id: String,
    pub message: StageMessage,
}

impl Delivery {
    pub fn stage(&self) -> StageName {
        self.message.stage
    }
}

/// Result of an enqueue guarded by a dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The dedup key was already held; nothing was added.
    Duplicate,
}

/// Snapshot of one stage queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    /// Waiting for a consumer
    pub ready: u64,
    /// Delivered, not yet acked
    pub pending: u64,
    /// Scheduled for later delivery
    pub delayed: u64,
}

/// Durable per-stage queues with at-least-once delivery.
#[async_trait]
pub trait StageQueue: Send + Sync {
    /// Create the queue and consumer group of every stage. Idempotent.
    async fn init(&self, stages: &[StageName]) -> QueueResult<()>;

    /// Add a message to its stage queue unless `dedup_key` was already used.
    async fn enqueue(&self, message: &StageMessage, dedup_key: &str)
        -> QueueResult<EnqueueOutcome>;

    /// Schedule a message for delivery after `delay`.
    async fn enqueue_delayed(
        &self,
        message: &StageMessage,
        delay: Duration,
        dedup_key: &str,
    ) -> QueueResult<EnqueueOutcome>;

    /// Move due delayed messages of the given stages into their queues.
    async fn promote_due(&self, stages: &[StageName]) -> QueueResult<usize>;

    /// Receive up to `count` new messages, waiting at most `block`.
    async fn consume(
        &self,
        stage: StageName,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Take over messages delivered to another consumer and left unacked
    /// for at least `min_idle`.
    async fn claim_stale(
        &self,
        stage: StageName,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Reset the idle time of a delivery still being worked on, so
    /// `claim_stale` leaves it with `consumer`. A no-op once it is acked.
    async fn keep_alive(&self, delivery: &Delivery, consumer: &str) -> QueueResult<()>;

    /// Acknowledge and remove a delivered message.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    async fn depth(&self, stage: StageName) -> QueueResult<QueueDepth>;

    async fn ping(&self) -> QueueResult<()>;
}
