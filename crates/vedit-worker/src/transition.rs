//! Pipeline state machine.
//!
//! There is no central scheduler: each worker decides, from the job record
//! alone, whether a delivered message is still wanted and what follows a
//! finished attempt. Both decisions are pure functions of their inputs.
//!
//! ```text
//! queued -> running(stage 0) -> ... -> running(stage n) -> succeeded
//!                 \___________________________/
//!                    retries exhausted -> failed
//! any non-terminal -> canceled
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use vedit_models::{Job, JobStatus, StageLease, StageName};

use crate::retry::RetryPolicy;

pub const DEADLINE_EXCEEDED: &str = "pipeline deadline exceeded";

/// What to do with a delivered `{job, stage}` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The stage is the job's current stage: run it.
    Process,
    /// Stale or unwanted delivery: ack and drop.
    Discard(&'static str),
    /// The stage already completed but the next one may never have been
    /// enqueued: enqueue it again under its entry dedup key.
    Recover(StageName),
    /// The pipeline ran past its wall-clock budget: fail the job.
    Expired,
    /// Another handler holds a live lease on the stage: leave the
    /// delivery pending until the lease is released or runs out.
    Leased,
}

/// Decide whether a delivery for `stage` should run against `job`.
///
/// `holder` is the token the caller would take the lease under.
pub fn admit(
    job: &Job,
    stage: StageName,
    holder: &str,
    now: DateTime<Utc>,
    max_duration: Duration,
) -> Admission {
    if job.is_terminal() {
        return Admission::Discard("job is terminal");
    }

    let current = job.current_stage();
    let recover = job.status == JobStatus::Running && job.previous_stage() == Some(stage);
    if current != Some(stage) && !recover {
        return Admission::Discard("stage is not current");
    }

    if !recover && job.leased_elsewhere(stage, holder, now) {
        return Admission::Leased;
    }

    if deadline_passed(job, now, max_duration) {
        return Admission::Expired;
    }

    match current {
        Some(next) if recover => Admission::Recover(next),
        Some(_) => Admission::Process,
        None => Admission::Discard("chain exhausted"),
    }
}

fn deadline_passed(job: &Job, now: DateTime<Utc>, max_duration: Duration) -> bool {
    let elapsed = now.signed_duration_since(job.created_at);
    match chrono::Duration::from_std(max_duration) {
        Ok(budget) => elapsed > budget,
        Err(_) => false,
    }
}

/// Result of one engine attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Exit 0 and the output was published at `artifact`.
    Succeeded { artifact: PathBuf },
    /// Non-zero exit, missing output or timeout when `retryable`;
    /// otherwise a failure retrying cannot fix (missing asset, bad path).
    Failed { reason: String, retryable: bool },
}

impl StageOutcome {
    pub fn succeeded(artifact: impl Into<PathBuf>) -> Self {
        Self::Succeeded {
            artifact: artifact.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            retryable: false,
        }
    }
}

/// Follow-up to perform once the transitioned record is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Enqueue(StageName),
    Retry { stage: StageName, delay: Duration },
    Complete,
    Fail(String),
}

/// Apply the outcome of `stage` to `job`.
///
/// `stage` must be the job's current stage. The returned record has its
/// revision bumped; persist it with a compare-and-swap against the input
/// record's revision.
pub fn transition(
    job: &Job,
    stage: StageName,
    outcome: StageOutcome,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> (Job, NextAction) {
    debug_assert_eq!(job.current_stage(), Some(stage));

    let mut next = job.clone();
    next.lease = None;
    next.touch(now);

    let action = match outcome {
        StageOutcome::Succeeded { artifact } => {
            next.artifact_paths.insert(stage, artifact);
            next.last_error = None;
            next.current_stage_index += 1;
            match next.current_stage() {
                Some(following) => {
                    next.status = JobStatus::Running;
                    NextAction::Enqueue(following)
                }
                None => {
                    next.status = JobStatus::Succeeded;
                    next.completed_at = Some(now);
                    NextAction::Complete
                }
            }
        }
        StageOutcome::Failed { reason, retryable } => {
            let attempts = next.attempts_for(stage) + 1;
            next.attempts.insert(stage, attempts);
            let reason = format!("{}: {}", stage, reason);
            next.last_error = Some(reason.clone());

            if retryable && policy.allows_retry(attempts) {
                next.status = JobStatus::Running;
                NextAction::Retry {
                    stage,
                    delay: policy.backoff.delay_for(attempts),
                }
            } else {
                next.status = JobStatus::Failed;
                next.completed_at = Some(now);
                NextAction::Fail(reason)
            }
        }
    };

    (next, action)
}

/// Record that a stage attempt is starting and lease it to `holder` for `ttl`.
pub fn mark_running(
    job: &Job,
    stage: StageName,
    holder: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Job {
    let expires_at = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let mut next = job.clone();
    next.status = JobStatus::Running;
    next.lease = Some(StageLease {
        stage,
        holder: holder.to_string(),
        expires_at,
    });
    next.touch(now);
    next
}

/// Fail a job whose pipeline outlived its budget.
pub fn expire(job: &Job, now: DateTime<Utc>) -> Job {
    let mut next = job.clone();
    next.status = JobStatus::Failed;
    next.last_error = Some(DEADLINE_EXCEEDED.to_string());
    next.completed_at = Some(now);
    next.lease = None;
    next.touch(now);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffPolicy;
    use std::collections::BTreeMap;
    use vedit_models::StageParams;

    fn job(stages: &[StageName]) -> Job {
        let parameters: BTreeMap<_, _> = stages
            .iter()
            .map(|s| (*s, StageParams::parse(*s, &serde_json::Value::Null).unwrap()))
            .collect();
        Job::new("owner-1", "/media/in.mp4", stages.to_vec(), parameters)
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(30)),
        )
    }

    const HOURS_6: Duration = Duration::from_secs(6 * 3600);
    const HOLDER: &str = "w1/a";
    const LEASE: Duration = Duration::from_secs(60);

    #[test]
    fn test_admit_current_stage() {
        let job = job(&[StageName::Cut, StageName::Export]);
        assert_eq!(admit(&job, StageName::Cut, HOLDER, Utc::now(), HOURS_6), Admission::Process);
        assert!(matches!(
            admit(&job, StageName::Export, HOLDER, Utc::now(), HOURS_6),
            Admission::Discard(_)
        ));
    }

    #[test]
    fn test_admit_terminal_discards() {
        for status in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Canceled] {
            let mut job = job(&[StageName::Cut]);
            job.status = status;
            assert!(matches!(
                admit(&job, StageName::Cut, HOLDER, Utc::now(), HOURS_6),
                Admission::Discard(_)
            ));
        }
    }

    #[test]
    fn test_admit_recovers_lost_enqueue() {
        let mut job = job(&[StageName::Cut, StageName::Export]);
        job.status = JobStatus::Running;
        job.current_stage_index = 1;

        assert_eq!(
            admit(&job, StageName::Cut, HOLDER, Utc::now(), HOURS_6),
            Admission::Recover(StageName::Export)
        );
    }

    #[test]
    fn test_admit_expired() {
        let mut job = job(&[StageName::Cut]);
        job.created_at = Utc::now() - chrono::Duration::hours(7);
        assert_eq!(admit(&job, StageName::Cut, HOLDER, Utc::now(), HOURS_6), Admission::Expired);

        // Stale deliveries are dropped even past the deadline
        assert!(matches!(
            admit(&job, StageName::Export, HOLDER, Utc::now(), HOURS_6),
            Admission::Discard(_)
        ));
    }

    #[test]
    fn test_success_advances_and_enqueues_next() {
        let job = job(&[StageName::Cut, StageName::Export]);
        let now = Utc::now();
        let (next, action) = transition(
            &job,
            StageName::Cut,
            StageOutcome::succeeded("/w/j/j-cut.mp4"),
            &policy(3),
            now,
        );

        assert_eq!(action, NextAction::Enqueue(StageName::Export));
        assert_eq!(next.current_stage_index, 1);
        assert_eq!(next.status, JobStatus::Running);
        assert_eq!(
            next.artifact_paths.get(&StageName::Cut),
            Some(&PathBuf::from("/w/j/j-cut.mp4"))
        );
        assert_eq!(next.revision, job.revision + 1);
    }

    #[test]
    fn test_success_on_last_stage_completes() {
        let mut job = job(&[StageName::Cut, StageName::Export]);
        job.current_stage_index = 1;
        job.status = JobStatus::Running;
        job.last_error = Some("export: flaky".into());

        let (next, action) = transition(
            &job,
            StageName::Export,
            StageOutcome::succeeded("/w/j/j-export.mp4"),
            &policy(3),
            Utc::now(),
        );

        assert_eq!(action, NextAction::Complete);
        assert_eq!(next.status, JobStatus::Succeeded);
        assert_eq!(next.current_stage_index, 2);
        assert!(next.completed_at.is_some());
        assert!(next.last_error.is_none());
    }

    #[test]
    fn test_failure_schedules_backoff_then_fails() {
        let job = job(&[StageName::Compression]);

        let (first, action) = transition(
            &job,
            StageName::Compression,
            StageOutcome::failed("exit status 1"),
            &policy(3),
            Utc::now(),
        );
        assert_eq!(
            action,
            NextAction::Retry {
                stage: StageName::Compression,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(first.attempts_for(StageName::Compression), 1);
        assert_eq!(first.current_stage_index, 0);

        let (second, action) = transition(
            &first,
            StageName::Compression,
            StageOutcome::failed("exit status 1"),
            &policy(3),
            Utc::now(),
        );
        assert_eq!(
            action,
            NextAction::Retry {
                stage: StageName::Compression,
                delay: Duration::from_secs(4)
            }
        );

        let (third, action) = transition(
            &second,
            StageName::Compression,
            StageOutcome::failed("exit status 1"),
            &policy(3),
            Utc::now(),
        );
        assert!(matches!(action, NextAction::Fail(_)));
        assert_eq!(third.status, JobStatus::Failed);
        assert_eq!(third.attempts_for(StageName::Compression), 3);
        assert_eq!(
            third.last_error.as_deref(),
            Some("compression: exit status 1")
        );
    }

    #[test]
    fn test_permanent_failure_skips_retries() {
        let voice = StageParams::parse(
            StageName::Voice,
            &serde_json::json!({"narration_path": "n.mp3"}),
        )
        .unwrap();
        let job = Job::new(
            "owner-1",
            "/media/in.mp4",
            vec![StageName::Voice],
            BTreeMap::from([(StageName::Voice, voice)]),
        );
        let (next, action) = transition(
            &job,
            StageName::Voice,
            StageOutcome::permanent("narration missing"),
            &policy(3),
            Utc::now(),
        );
        assert!(matches!(action, NextAction::Fail(_)));
        assert_eq!(next.status, JobStatus::Failed);
        assert_eq!(next.attempts_for(StageName::Voice), 1);
    }

    #[test]
    fn test_mark_running_and_expire() {
        let job = job(&[StageName::Cut]);
        let now = Utc::now();
        let running = mark_running(&job, StageName::Cut, HOLDER, now, LEASE);
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.revision, job.revision + 1);
        let lease = running.lease.as_ref().unwrap();
        assert_eq!(lease.holder, HOLDER);
        assert_eq!(lease.expires_at, now + chrono::Duration::seconds(60));

        let expired = expire(&running, Utc::now());
        assert_eq!(expired.status, JobStatus::Failed);
        assert_eq!(expired.last_error.as_deref(), Some(DEADLINE_EXCEEDED));
        assert!(expired.lease.is_none());
        assert!(expired.is_terminal());
    }

    #[test]
    fn test_live_lease_holds_other_deliveries() {
        let job = job(&[StageName::Compression]);
        let now = Utc::now();
        let running = mark_running(&job, StageName::Compression, HOLDER, now, LEASE);

        assert_eq!(
            admit(&running, StageName::Compression, "w2/b", now, HOURS_6),
            Admission::Leased
        );
        // The holder itself re-admits after a lost write
        assert_eq!(
            admit(&running, StageName::Compression, HOLDER, now, HOURS_6),
            Admission::Process
        );
        // A crashed holder's lease runs out
        let later = now + chrono::Duration::seconds(61);
        assert_eq!(
            admit(&running, StageName::Compression, "w2/b", later, HOURS_6),
            Admission::Process
        );
    }

    #[test]
    fn test_transition_releases_lease() {
        let job = job(&[StageName::Cut, StageName::Export]);
        let running = mark_running(&job, StageName::Cut, HOLDER, Utc::now(), LEASE);

        let (next, _) = transition(
            &running,
            StageName::Cut,
            StageOutcome::succeeded("/w/j/j-cut.mp4"),
            &policy(3),
            Utc::now(),
        );
        assert!(next.lease.is_none());
        assert_eq!(
            admit(&next, StageName::Export, "w2/b", Utc::now(), HOURS_6),
            Admission::Process
        );

        let (retrying, _) = transition(
            &running,
            StageName::Cut,
            StageOutcome::failed("exit status 1"),
            &policy(3),
            Utc::now(),
        );
        assert!(retrying.lease.is_none());
    }
}
