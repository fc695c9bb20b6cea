//! In-process [`JobStore`] for tests and single-process runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use vedit_models::{Job, JobId};

use crate::backend::JobStore;
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<JobId, Job>>> {
        self.jobs
            .lock()
            .map_err(|_| StoreError::connection_failed("memory store lock poisoned"))
    }

    /// Overwrite a record without a revision check. Test setup only.
    pub fn put(&self, job: Job) -> StoreResult<()> {
        self.lock()?.insert(job.id.clone(), job);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> StoreResult<()> {
        let mut jobs = self.lock()?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn compare_and_swap(&self, job: &Job, expected_revision: u64) -> StoreResult<bool> {
        let mut jobs = self.lock()?;
        let current = jobs
            .get_mut(&job.id)
            .ok_or_else(|| StoreError::not_found(job.id.to_string()))?;
        if current.revision != expected_revision {
            return Ok(false);
        }
        *current = job.clone();
        Ok(true)
    }

    async fn list_by_owner(&self, owner_id: &str, limit: usize) -> StoreResult<Vec<Job>> {
        let jobs = self.lock()?;
        let mut owned: Vec<Job> = jobs
            .values()
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use vedit_models::{JobStatus, StageName, StageParams};

    fn job(owner: &str) -> Job {
        let params: BTreeMap<_, _> = [(
            StageName::Cut,
            StageParams::parse(StageName::Cut, &serde_json::Value::Null).unwrap(),
        )]
        .into_iter()
        .collect();
        Job::new(owner, "/media/in.mp4", vec![StageName::Cut], params)
    }

    #[tokio::test]
    async fn test_insert_is_create_if_absent() {
        let store = MemoryJobStore::new();
        let j = job("alice");
        assert_ok!(store.insert(&j).await);
        assert!(matches!(
            store.insert(&j).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.get(&j.id).await.unwrap(), Some(j));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryJobStore::new();
        let mut j = job("alice");
        store.insert(&j).await.unwrap();

        let expected = j.revision;
        j.status = JobStatus::Running;
        j.touch(Utc::now());
        assert!(assert_ok!(store.compare_and_swap(&j, expected).await));

        // A writer still holding the old revision loses.
        let mut stale = j.clone();
        stale.status = JobStatus::Canceled;
        assert!(!store.compare_and_swap(&stale, expected).await.unwrap());

        let stored = store.get(&j.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_cas_on_missing_record() {
        let store = MemoryJobStore::new();
        let j = job("alice");
        assert!(matches!(
            store.compare_and_swap(&j, 0).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_owner_newest_first() {
        let store = MemoryJobStore::new();
        let mut older = job("alice");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = job("alice");
        let other = job("bob");
        for j in [&older, &newer, &other] {
            store.insert(j).await.unwrap();
        }

        let listed = store.list_by_owner("alice", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(store.list_by_owner("alice", 1).await.unwrap().len(), 1);
    }
}
