//! Liveness and readiness probes.

use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness: the process is up and serving.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Outcome of pinging one backend.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Probe {
    Ok { latency_ms: u64 },
    Error { error: String },
}

impl Probe {
    async fn run<E, F>(ping: F) -> Self
    where
        E: std::fmt::Display,
        F: Future<Output = Result<(), E>>,
    {
        let started = Instant::now();
        match ping.await {
            Ok(()) => Probe::Ok {
                latency_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => Probe::Error {
                error: e.to_string(),
            },
        }
    }

    fn is_ok(&self) -> bool {
        matches!(self, Probe::Ok { .. })
    }
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub store: Probe,
    pub queue: Probe,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Readiness: 200 when the job store and the queue backend both answer,
/// 503 with the failing check otherwise.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let checks = ReadinessChecks {
        store: Probe::run(state.store.ping()).await,
        queue: Probe::run(state.queue.ping()).await,
    };

    if checks.store.is_ok() && checks.queue.is_ok() {
        let body = ReadinessResponse {
            status: "ready",
            checks,
        };
        (StatusCode::OK, Json(body))
    } else {
        let body = ReadinessResponse {
            status: "degraded",
            checks,
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}
