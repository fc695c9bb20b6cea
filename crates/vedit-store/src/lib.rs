//! Job record storage with revision-checked updates.

pub mod backend;
pub mod error;
pub mod memory;
pub mod redis_store;

pub use backend::JobStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use redis_store::{RedisJobStore, StoreConfig};
