//! Admin handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use vedit_models::StageName;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

/// Depths of one stage queue.
#[derive(Debug, Serialize)]
pub struct StageQueueStatus {
    pub stage: StageName,
    pub ready: u64,
    pub pending: u64,
    pub delayed: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub stages: Vec<StageQueueStatus>,
}

/// Per-stage queue depths. Requires the admin role.
pub async fn get_queue_status(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<QueueStatusResponse>> {
    user.require_admin()?;

    let mut stages = Vec::with_capacity(StageName::ALL.len());
    for &stage in StageName::ALL {
        let depth = state.queue.depth(stage).await?;
        metrics::set_queue_depth(stage.as_str(), depth.ready, depth.pending, depth.delayed);
        stages.push(StageQueueStatus {
            stage,
            ready: depth.ready,
            pending: depth.pending,
            delayed: depth.delayed,
        });
    }

    Ok(Json(QueueStatusResponse { stages }))
}
