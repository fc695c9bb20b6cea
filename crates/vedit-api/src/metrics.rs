//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Install the Prometheus recorder. The returned handle renders `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vedit_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vedit_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vedit_http_requests_in_flight";

    // Job metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "vedit_jobs_submitted_total";
    pub const JOBS_CANCELED_TOTAL: &str = "vedit_jobs_canceled_total";
    pub const JOBS_RETRIED_TOTAL: &str = "vedit_jobs_retried_total";

    // Queue metrics
    pub const QUEUE_READY: &str = "vedit_queue_ready";
    pub const QUEUE_PENDING: &str = "vedit_queue_pending";
    pub const QUEUE_DELAYED: &str = "vedit_queue_delayed";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "vedit_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_submitted(first_stage: &str) {
    let labels = [("stage", first_stage.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

pub fn record_job_canceled() {
    counter!(names::JOBS_CANCELED_TOTAL).increment(1);
}

pub fn record_job_retried(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_RETRIED_TOTAL, &labels).increment(1);
}

/// Publish the depth of one stage queue, refreshed on each admin read.
pub fn set_queue_depth(stage: &str, ready: u64, pending: u64, delayed: u64) {
    let labels = [("stage", stage.to_string())];
    gauge!(names::QUEUE_READY, &labels).set(ready as f64);
    gauge!(names::QUEUE_PENDING, &labels).set(pending as f64);
    gauge!(names::QUEUE_DELAYED, &labels).set(delayed as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels (job ids become `:id`).
fn sanitize_path(path: &str) -> String {
    static UUID: OnceLock<Option<Regex>> = OnceLock::new();
    let uuid = UUID.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .ok()
    });

    match uuid {
        Some(re) => re.replace_all(path, ":id").into_owned(),
        None => path.to_string(),
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
