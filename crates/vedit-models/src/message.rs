//! Queue payload handed from one stage to the next.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::stage::StageName;

/// Work item on a stage queue: "run `stage` for `job_id`".
///
/// Carries no job state; workers always reload the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct StageMessage {
    pub job_id: JobId,
    pub stage: StageName,
}

impl StageMessage {
    pub fn new(job_id: JobId, stage: StageName) -> Self {
        Self { job_id, stage }
    }

    /// Dedup key for the job entering `stage` (submission or advance).
    pub fn enter_key(&self) -> String {
        format!("enter:{}:{}", self.job_id, self.stage)
    }

    /// Dedup key for the automatic retry scheduled by the write at `revision`.
    /// Attempt counts restart after a manual retry; revisions never do.
    pub fn retry_key(&self, revision: u64) -> String {
        format!("retry:{}:{}:{}", self.job_id, self.stage, revision)
    }

    /// Dedup key for a manual retry, unique per record revision.
    pub fn manual_retry_key(&self, revision: u64) -> String {
        format!("manual:{}:{}:{}", self.job_id, self.stage, revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let msg = StageMessage::new(JobId::from_string("abc"), StageName::AddMusic);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"job_id":"abc","stage":"add-music"}"#);
    }

    #[test]
    fn test_dedup_keys() {
        let msg = StageMessage::new(JobId::from_string("abc"), StageName::Cut);
        assert_eq!(msg.enter_key(), "enter:abc:cut");
        assert_eq!(msg.retry_key(2), "retry:abc:cut:2");
        assert_ne!(msg.retry_key(5), msg.manual_retry_key(5));
        assert_ne!(msg.manual_retry_key(4), msg.manual_retry_key(7));
    }
}
