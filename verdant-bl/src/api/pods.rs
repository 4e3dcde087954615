//! Pod registry mirror and pod assignments

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Pod, PodAssignment};
use crate::AppState;

/// POST /pods request; `id` may be given to mirror an existing registry pod
#[derive(Debug, Deserialize)]
pub struct RegisterPodRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub site_id: String,
    pub capacity: i64,
}

#[derive(Debug, Deserialize)]
pub struct AssignPodRequest {
    pub actor: String,
    pub pod_id: Uuid,
    pub plant_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseAssignmentQuery {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentsQuery {
    #[serde(default)]
    pub active_only: bool,
}

/// POST /pods
pub async fn register_pod(
    State(state): State<AppState>,
    Json(request): Json<RegisterPodRequest>,
) -> Result<(StatusCode, Json<Pod>)> {
    let pod = Pod {
        id: request.id.unwrap_or_else(Uuid::new_v4),
        name: request.name,
        site_id: request.site_id,
        capacity: request.capacity,
    };
    let pod = state.service.register_pod(pod).await?;
    Ok((StatusCode::CREATED, Json(pod)))
}

/// GET /pods/:id
pub async fn get_pod(State(state): State<AppState>, Path(pod_id): Path<Uuid>) -> Result<Json<Pod>> {
    Ok(Json(state.service.get_pod(pod_id).await?))
}

/// POST /batches/:id/pods
pub async fn assign_pod(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<AssignPodRequest>,
) -> Result<(StatusCode, Json<PodAssignment>)> {
    let assignment = state
        .service
        .assign_pod(batch_id, request.pod_id, request.plant_count, &request.actor)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// GET /batches/:id/pods?active_only=true
pub async fn batch_assignments(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Query(query): Query<AssignmentsQuery>,
) -> Result<Json<Vec<PodAssignment>>> {
    Ok(Json(
        state
            .service
            .pod_assignments(batch_id, query.active_only)
            .await?,
    ))
}

/// DELETE /pod-assignments/:id?actor=...
pub async fn release_assignment(
    State(state): State<AppState>,
    Path(assignment_id): Path<Uuid>,
    Query(query): Query<ReleaseAssignmentQuery>,
) -> Result<Json<PodAssignment>> {
    let assignment = state
        .service
        .release_pod_assignment(assignment_id, &query.actor)
        .await?;
    Ok(Json(assignment))
}

pub fn pod_routes() -> Router<AppState> {
    Router::new()
        .route("/pods", post(register_pod))
        .route("/pods/:id", get(get_pod))
        .route("/batches/:id/pods", post(assign_pod).get(batch_assignments))
        .route("/pod-assignments/:id", delete(release_assignment))
}
