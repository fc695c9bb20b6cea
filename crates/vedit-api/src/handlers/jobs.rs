//! Job handlers.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use vedit_models::{Job, JobListResponse, SubmitRequest, SubmitResponse};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Query of `GET /api/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

/// Submit a job. Answers 202: processing happens in the workers.
pub async fn submit_job(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let job = state.jobs.submit(&user.owner_id, &request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// List the caller's most recent jobs.
pub async fn list_jobs(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let jobs = state.jobs.list(&user, query.limit).await?;
    Ok(Json(JobListResponse { jobs }))
}

/// Job status snapshot.
pub async fn get_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.get(&user, &job_id).await?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.cancel(&user, &job_id).await?))
}

pub async fn retry_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.retry(&user, &job_id).await?))
}

/// Stream the final artifact of a succeeded job. Range requests are
/// honored.
pub async fn download_artifact(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = state.jobs.artifact(&user, &job_id).await?;

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(ApiError::not_found("Artifact file is missing")),
    }

    let mut file_request = Request::new(Body::empty());
    if let Some(range) = headers.get(header::RANGE) {
        file_request
            .headers_mut()
            .insert(header::RANGE, range.clone());
    }

    let response = match ServeFile::new(&path).oneshot(file_request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };
    let mut response = response.into_response();

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}
