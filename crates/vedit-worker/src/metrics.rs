//! Prometheus metrics for stage workers.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_RUNS_TOTAL: &str = "vedit_stage_runs_total";
    pub const STAGE_DURATION_SECONDS: &str = "vedit_stage_duration_seconds";
    pub const STAGE_RETRIES_TOTAL: &str = "vedit_stage_retries_total";
    pub const STAGE_DISCARDED_TOTAL: &str = "vedit_stage_discarded_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vedit_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vedit_jobs_failed_total";
    pub const DELAYED_PROMOTED_TOTAL: &str = "vedit_delayed_promoted_total";
    pub const CLAIMED_TOTAL: &str = "vedit_stage_claimed_total";
}

/// Serve `/metrics` on `port` from a background listener.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::Metrics(e.to_string()))
}

/// Record one engine invocation.
pub fn record_stage_run(stage: &str, result: &'static str, duration_secs: f64) {
    let labels = [("stage", stage.to_string()), ("result", result.to_string())];
    counter!(names::STAGE_RUNS_TOTAL, &labels).increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_stage_retry(stage: &str) {
    counter!(names::STAGE_RETRIES_TOTAL, "stage" => stage.to_string()).increment(1);
}

/// Record a delivery dropped at admission.
pub fn record_stage_discarded(stage: &str, reason: &'static str) {
    counter!(
        names::STAGE_DISCARDED_TOTAL,
        "stage" => stage.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(stage: &str) {
    counter!(names::JOBS_FAILED_TOTAL, "stage" => stage.to_string()).increment(1);
}

pub fn record_promoted(count: usize) {
    counter!(names::DELAYED_PROMOTED_TOTAL).increment(count as u64);
}

pub fn record_claimed(stage: &str, count: usize) {
    counter!(names::CLAIMED_TOTAL, "stage" => stage.to_string()).increment(count as u64);
}
