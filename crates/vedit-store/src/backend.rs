//! The job store abstraction.

use async_trait::async_trait;
use vedit_models::{Job, JobId};

use crate::error::StoreResult;

/// Durable keyed store of job records.
///
/// Every write after creation goes through [`JobStore::compare_and_swap`]:
/// the caller bumps `revision` (see [`Job::touch`]) and passes the revision
/// it read.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a record. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, job: &Job) -> StoreResult<()>;

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// Replace the record if its stored revision equals `expected_revision`.
    /// Returns false on a revision mismatch; `NotFound` if there is no record.
    async fn compare_and_swap(&self, job: &Job, expected_revision: u64) -> StoreResult<bool>;

    /// Most recent jobs of an owner, newest first.
    async fn list_by_owner(&self, owner_id: &str, limit: usize) -> StoreResult<Vec<Job>>;

    async fn ping(&self) -> StoreResult<()>;
}
