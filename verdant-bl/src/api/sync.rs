//! Regulatory sync status and operator re-trigger

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{SyncJob, SyncStatus};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct RetriggerRequest {
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct BatchSyncResponse {
    pub batch_id: Uuid,
    /// Latest job; `None` if no phase change was ever queued
    pub latest: Option<SyncJob>,
    pub jobs: Vec<SyncJob>,
}

/// GET /batches/:id/sync
pub async fn batch_sync(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchSyncResponse>> {
    let jobs = state.service.batch_sync_jobs(batch_id).await?;
    let latest = jobs.iter().max_by_key(|job| job.seq).cloned();
    Ok(Json(BatchSyncResponse {
        batch_id,
        latest,
        jobs,
    }))
}

/// GET /sync/jobs?status=failed&limit=50
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<SyncJob>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SyncStatus>)
        .transpose()?;
    Ok(Json(state.service.list_sync_jobs(status, query.limit).await?))
}

/// POST /sync/jobs/:id/retrigger
pub async fn retrigger(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<RetriggerRequest>,
) -> Result<Json<SyncJob>> {
    Ok(Json(state.service.retrigger_sync(job_id, &request.actor).await?))
}

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/batches/:id/sync", get(batch_sync))
        .route("/sync/jobs", get(list_jobs))
        .route("/sync/jobs/:id/retrigger", post(retrigger))
}
