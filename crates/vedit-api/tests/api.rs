//! HTTP-level tests against in-memory store and queue.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use vedit_api::{create_router, ApiConfig, AppState, Claims, JwtVerifier};
use vedit_models::{Job, JobStatus, StageMessage, StageName, StageParams};
use vedit_queue::{
    Delivery, EnqueueOutcome, MemoryQueue, QueueDepth, QueueError, QueueResult, StageQueue,
};
use vedit_store::{JobStore, MemoryJobStore};

const SECRET: &str = "test-secret";

struct Harness {
    _media: TempDir,
    media_root: PathBuf,
    store: Arc<MemoryJobStore>,
    queue: Arc<MemoryQueue>,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(tweak: impl FnOnce(&mut ApiConfig)) -> Self {
        let queue = Arc::new(MemoryQueue::new());
        Self::build(tweak, Arc::clone(&queue), queue)
    }

    fn build(
        tweak: impl FnOnce(&mut ApiConfig),
        queue: Arc<MemoryQueue>,
        backend: Arc<dyn StageQueue>,
    ) -> Self {
        let media = TempDir::new().unwrap();
        let media_root = media.path().canonicalize().unwrap();
        std::fs::create_dir_all(media_root.join("uploads")).unwrap();
        std::fs::write(media_root.join("uploads/in.mp4"), b"not really a video").unwrap();
        std::fs::write(media_root.join("uploads/voice.wav"), b"narration").unwrap();

        let mut config = ApiConfig {
            media_root: media_root.clone(),
            jwt_secret: Some(SECRET.to_string()),
            ..Default::default()
        };
        tweak(&mut config);

        let store = Arc::new(MemoryJobStore::new());
        let state = AppState::from_parts(
            config,
            store.clone(),
            backend,
            Arc::new(JwtVerifier::new(SECRET, None)),
        );

        Self {
            _media: media,
            media_root,
            store,
            queue,
            app: create_router(state, None),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            let bearer = format!("Bearer {}", token(user, None));
            builder = builder.header(header::AUTHORIZATION, bearer);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let (status, bytes) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn jobs_of(&self, owner: &str) -> Vec<Job> {
        self.store.list_by_owner(owner, 100).await.unwrap()
    }

    fn stored_job(&self, owner: &str, stages: &[StageName], status: JobStatus) -> Job {
        let parameters: BTreeMap<_, _> = stages
            .iter()
            .map(|&stage| (stage, StageParams::parse(stage, &Value::Null).unwrap()))
            .collect();
        let mut job = Job::new(
            owner,
            self.media_root.join("uploads/in.mp4"),
            stages.to_vec(),
            parameters,
        );
        job.status = status;
        self.store.put(job.clone()).unwrap();
        job
    }
}

fn token(sub: &str, role: Option<&str>) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        iss: None,
        role: role.map(str::to_string),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn submission(stages: &[&str], parameters: Value) -> Value {
    json!({
        "source_path": "uploads/in.mp4",
        "stages": stages,
        "parameters": parameters,
    })
}

#[tokio::test]
async fn test_submit_creates_job_and_enqueues_first_stage() {
    let h = Harness::new();

    let (status, body) = h
        .call(
            "POST",
            "/api/jobs",
            Some("alice"),
            Some(submission(
                &["cut", "export"],
                json!({"cut": {"start_secs": 1.0, "duration_secs": 3.0}}),
            )),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");

    let jobs = h.jobs_of("alice").await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(body["job_id"], job.id.as_str());
    assert_eq!(job.stage_chain, vec![StageName::Cut, StageName::Export]);
    assert_eq!(job.current_stage_index, 0);
    assert_eq!(job.source_path, h.media_root.join("uploads/in.mp4"));

    assert_eq!(
        h.queue.ready_messages(StageName::Cut),
        vec![StageMessage::new(job.id.clone(), StageName::Cut)]
    );
    assert!(h.queue.ready_messages(StageName::Export).is_empty());
}

#[tokio::test]
async fn test_unknown_stage_is_rejected_without_job() {
    let h = Harness::new();

    let (status, body) = h
        .call(
            "POST",
            "/api/jobs",
            Some("alice"),
            Some(submission(&["cut", "teleport"], json!({}))),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert!(body["detail"].as_str().unwrap().contains("teleport"));
    assert!(h.jobs_of("alice").await.is_empty());
    assert_eq!(h.queue.enqueued_total(), 0);
}

#[tokio::test]
async fn test_submission_validation_errors() {
    let h = Harness::with_config(|c| c.max_source_bytes = 4);

    let cases = [
        submission(&[], json!({})),
        submission(&["cut", "cut"], json!({})),
        submission(&["resolution"], json!({})),
        submission(&["cut"], json!({"export": {}})),
        // source exceeds the 4 byte limit
        submission(&["cut"], json!({})),
        json!({"source_path": "../../etc/passwd", "stages": ["cut"]}),
        json!({"source_path": "uploads/missing.mp4", "stages": ["cut"]}),
        json!({"source_path": "uploads", "stages": ["cut"]}),
        json!({"stages": ["cut"]}),
    ];

    for case in cases {
        let (status, body) = h
            .call("POST", "/api/jobs", Some("alice"), Some(case.clone()))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "case: {}", case);
        assert_eq!(body["code"], "validation_error", "case: {}", case);
    }

    assert!(h.jobs_of("alice").await.is_empty());
    assert_eq!(h.queue.enqueued_total(), 0);
}

#[tokio::test]
async fn test_referenced_files_must_live_under_media_root() {
    let h = Harness::new();

    let (status, body) = h
        .call(
            "POST",
            "/api/jobs",
            Some("alice"),
            Some(submission(
                &["voice"],
                json!({"voice": {"narration_path": "../secret.wav"}}),
            )),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, _) = h
        .call(
            "POST",
            "/api/jobs",
            Some("alice"),
            Some(submission(
                &["voice"],
                json!({"voice": {"narration_path": "uploads/voice.wav"}}),
            )),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_missing_or_invalid_token() {
    let h = Harness::new();

    let (status, body) = h.call("GET", "/api/jobs", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "auth_error");

    let request = Request::builder()
        .uri("/api/jobs")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = h.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_status_is_owner_checked() {
    let h = Harness::new();
    let job = h.stored_job("alice", &[StageName::Cut], JobStatus::Running);
    let uri = format!("/api/jobs/{}", job.id);

    let (status, body) = h.call("GET", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["stage_chain"], json!(["cut"]));

    let (status, body) = h.call("GET", &uri, Some("mallory"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let missing = format!("/api/jobs/{}", uuid::Uuid::new_v4());
    let (status, body) = h.call("GET", &missing, Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = h.call("GET", "/api/jobs/not-a-uuid", Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_returns_only_own_jobs() {
    let h = Harness::new();
    h.stored_job("alice", &[StageName::Cut], JobStatus::Queued);
    h.stored_job("alice", &[StageName::Export], JobStatus::Succeeded);
    h.stored_job("bob", &[StageName::Cut], JobStatus::Queued);

    let (status, body) = h.call("GET", "/api/jobs", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j["owner_id"] == "alice"));

    let (_, body) = h.call("GET", "/api/jobs?limit=1", Some("alice"), None).await;
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_then_conflict() {
    let h = Harness::new();
    let job = h.stored_job("alice", &[StageName::Cut, StageName::Export], JobStatus::Queued);
    let uri = format!("/api/jobs/{}/cancel", job.id);

    let (status, body) = h.call("POST", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "canceled");

    let stored = h.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Canceled);
    assert_eq!(stored.revision, job.revision + 1);
    assert!(stored.completed_at.is_some());

    let (status, body) = h.call("POST", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, _) = h.call("POST", &uri, Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_retry_resets_failed_stage_and_requeues() {
    let h = Harness::new();
    let mut job = h.stored_job("alice", &[StageName::Cut, StageName::Compression], JobStatus::Failed);
    job.current_stage_index = 1;
    job.artifact_paths
        .insert(StageName::Cut, h.media_root.join("cut.mp4"));
    job.attempts.insert(StageName::Cut, 1);
    job.attempts.insert(StageName::Compression, 3);
    job.last_error = Some("compression: ffmpeg exited with 1".into());
    h.store.put(job.clone()).unwrap();

    let uri = format!("/api/jobs/{}/retry", job.id);
    let (status, body) = h.call("POST", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");

    let stored = h.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.attempts_for(StageName::Compression), 0);
    assert_eq!(stored.attempts_for(StageName::Cut), 1);
    assert_eq!(stored.last_error, None);
    assert_eq!(stored.current_stage_index, 1);
    assert_eq!(
        h.queue.ready_messages(StageName::Compression),
        vec![StageMessage::new(job.id.clone(), StageName::Compression)]
    );

    // Only failed jobs can be retried
    let (status, body) = h.call("POST", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn test_artifact_download() {
    let h = Harness::new();
    let output = h.media_root.join("final.mp4");
    std::fs::write(&output, b"final media bytes").unwrap();

    let mut job = h.stored_job(
        "alice",
        &[StageName::Export, StageName::Thumbnail],
        JobStatus::Succeeded,
    );
    job.current_stage_index = 2;
    job.artifact_paths.insert(StageName::Export, output.clone());
    job.artifact_paths
        .insert(StageName::Thumbnail, h.media_root.join("thumb.jpg"));
    h.store.put(job.clone()).unwrap();

    let request = Request::builder()
        .uri(format!("/api/jobs/{}/artifact", job.id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token("alice", None)))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("final.mp4"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"final media bytes");

    let running = h.stored_job("alice", &[StageName::Export], JobStatus::Running);
    let (status, body) = h
        .call(
            "GET",
            &format!("/api/jobs/{}/artifact", running.id),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn test_queue_status_requires_admin() {
    let h = Harness::new();
    h.call(
        "POST",
        "/api/jobs",
        Some("alice"),
        Some(submission(&["cut"], json!({}))),
    )
    .await;

    let (status, body) = h.call("GET", "/api/admin/queues", Some("alice"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let request = Request::builder()
        .uri("/api/admin/queues")
        .header(header::AUTHORIZATION, format!("Bearer {}", token("ops", Some("admin"))))
        .body(Body::empty())
        .unwrap();
    let (status, bytes) = h.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let stages = body["stages"].as_array().unwrap();
    assert_eq!(stages.len(), StageName::ALL.len());
    let cut = stages.iter().find(|s| s["stage"] == "cut").unwrap();
    assert_eq!(cut["ready"], 1);
}

/// Queue backend that is always down.
struct DownQueue;

#[async_trait]
impl StageQueue for DownQueue {
    async fn init(&self, _stages: &[StageName]) -> QueueResult<()> {
        Err(QueueError::connection_failed("down"))
    }

    async fn enqueue(&self, _message: &StageMessage, _key: &str) -> QueueResult<EnqueueOutcome> {
        Err(QueueError::connection_failed("down"))
    }

    async fn enqueue_delayed(
        &self,
        _message: &StageMessage,
        _delay: Duration,
        _key: &str,
    ) -> QueueResult<EnqueueOutcome> {
        Err(QueueError::connection_failed("down"))
    }

    async fn promote_due(&self, _stages: &[StageName]) -> QueueResult<usize> {
        Err(QueueError::connection_failed("down"))
    }

    async fn consume(
        &self,
        _stage: StageName,
        _consumer: &str,
        _block: Duration,
        _count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        Err(QueueError::connection_failed("down"))
    }

    async fn claim_stale(
        &self,
        _stage: StageName,
        _consumer: &str,
        _min_idle: Duration,
        _count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        Err(QueueError::connection_failed("down"))
    }

    async fn keep_alive(&self, _delivery: &Delivery, _consumer: &str) -> QueueResult<()> {
        Err(QueueError::connection_failed("down"))
    }

    async fn ack(&self, _delivery: &Delivery) -> QueueResult<()> {
        Err(QueueError::connection_failed("down"))
    }

    async fn depth(&self, _stage: StageName) -> QueueResult<QueueDepth> {
        Err(QueueError::connection_failed("down"))
    }

    async fn ping(&self) -> QueueResult<()> {
        Err(QueueError::connection_failed("down"))
    }
}

#[tokio::test]
async fn test_enqueue_failure_marks_job_failed() {
    let h = Harness::build(|_| {}, Arc::new(MemoryQueue::new()), Arc::new(DownQueue));

    let (status, body) = h
        .call(
            "POST",
            "/api/jobs",
            Some("alice"),
            Some(submission(&["cut"], json!({}))),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "queue_unavailable");

    let jobs = h.jobs_of("alice").await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .starts_with("enqueue failed"));

    let (status, body) = h.call("GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["queue"]["status"], "error");
}

#[tokio::test]
async fn test_health_and_ready() {
    let h = Harness::new();

    let (status, body) = h.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let request = Request::builder()
        .uri("/ready")
        .header("X-Request-ID", "probe-1")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "probe-1");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}
