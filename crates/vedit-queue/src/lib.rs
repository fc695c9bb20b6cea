//! Per-stage job queues behind the [`StageQueue`] trait.
//!
//! [`RedisStageQueue`] keeps one stream and consumer group per stage, plus a
//! sorted set of delayed retries. [`MemoryQueue`] mirrors it for tests.

pub mod backend;
pub mod error;
pub mod memory;
pub mod redis_queue;

pub use backend::{Delivery, EnqueueOutcome, QueueDepth, StageQueue};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use redis_queue::{QueueConfig, RedisStageQueue};
