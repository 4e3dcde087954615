//! Batch lifecycle endpoints
//!
//! Creation, transitions, quarantine, tags, destruction and read models.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Batch, BatchEvent, DestroyOptions, DestroyOutcome, Domain, NewBatch, Stage, StageHistoryEntry,
    TagAssignmentResult, TagCompletion, TransitionOutcome, WasteLog,
};
use crate::AppState;

/// POST /batches request
///
/// `stage` is a stage name, checked against the domain's graph.
#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub actor: String,
    pub domain_type: Domain,
    pub batch_number: String,
    pub stage: String,
    pub plant_count: i64,
    pub site_id: String,
    pub cultivar_id: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub expected_harvest_date: Option<NaiveDate>,
    #[serde(default)]
    pub external_batch_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub actor: String,
    pub to: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuarantineRequest {
    pub actor: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub actor: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTagsRequest {
    pub actor: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DestroyRequest {
    pub actor: String,
    pub reason: String,
    #[serde(flatten)]
    pub options: DestroyOptions,
}

#[derive(Debug, Serialize)]
pub struct NextStagesResponse {
    pub batch_id: Uuid,
    pub current: Stage,
    pub next: Vec<Stage>,
}

/// POST /batches
pub async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<Batch>)> {
    let stage = request.domain_type.parse_stage(&request.stage)?;
    let new = NewBatch {
        domain_type: request.domain_type,
        batch_number: request.batch_number,
        stage,
        plant_count: request.plant_count,
        site_id: request.site_id,
        cultivar_id: request.cultivar_id,
        start_date: request.start_date,
        expected_harvest_date: request.expected_harvest_date,
        external_batch_id: request.external_batch_id,
    };

    let batch = state.service.create_batch(new, &request.actor).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// GET /batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Batch>> {
    Ok(Json(state.service.get_batch(batch_id).await?))
}

/// POST /batches/:id/transition
pub async fn transition(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<TransitionOutcome>> {
    let batch = state.service.get_batch(batch_id).await?;
    let to = batch.domain_type.parse_stage(&request.to)?;

    let outcome = state
        .service
        .transition(batch_id, to, &request.actor, request.notes.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// GET /batches/:id/next-stages
pub async fn next_stages(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<NextStagesResponse>> {
    let batch = state.service.get_batch(batch_id).await?;
    let next = state.service.next_stages(batch_id).await?;
    Ok(Json(NextStagesResponse {
        batch_id,
        current: batch.stage,
        next,
    }))
}

/// GET /batches/:id/history
pub async fn stage_history(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Vec<StageHistoryEntry>>> {
    Ok(Json(state.service.stage_history(batch_id).await?))
}

/// GET /batches/:id/events
pub async fn batch_events(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Vec<BatchEvent>>> {
    Ok(Json(state.service.events(batch_id).await?))
}

/// POST /batches/:id/quarantine
pub async fn quarantine(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<QuarantineRequest>,
) -> Result<Json<Batch>> {
    let batch = state
        .service
        .quarantine(batch_id, &request.reason, &request.actor)
        .await?;
    Ok(Json(batch))
}

/// POST /batches/:id/release
pub async fn release(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<Batch>> {
    let batch = state
        .service
        .release(batch_id, &request.actor, request.notes.as_deref())
        .await?;
    Ok(Json(batch))
}

/// POST /batches/:id/tags
pub async fn assign_tags(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<AssignTagsRequest>,
) -> Result<Json<TagAssignmentResult>> {
    let result = state
        .service
        .assign_tags(batch_id, &request.tags, &request.actor)
        .await?;
    Ok(Json(result))
}

/// GET /batches/:id/tags/completion
pub async fn tag_completion(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<TagCompletion>> {
    Ok(Json(state.service.tag_completion(batch_id).await?))
}

/// POST /batches/:id/destroy
pub async fn destroy(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<DestroyRequest>,
) -> Result<Json<DestroyOutcome>> {
    let outcome = state
        .service
        .destroy(batch_id, &request.reason, &request.actor, request.options)
        .await?;
    Ok(Json(outcome))
}

/// GET /batches/:id/waste-logs
pub async fn waste_logs(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Vec<WasteLog>>> {
    Ok(Json(state.service.waste_logs(batch_id).await?))
}

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batches", post(create_batch))
        .route("/batches/:id", get(get_batch))
        .route("/batches/:id/transition", post(transition))
        .route("/batches/:id/next-stages", get(next_stages))
        .route("/batches/:id/history", get(stage_history))
        .route("/batches/:id/events", get(batch_events))
        .route("/batches/:id/quarantine", post(quarantine))
        .route("/batches/:id/release", post(release))
        .route("/batches/:id/tags", post(assign_tags))
        .route("/batches/:id/tags/completion", get(tag_completion))
        .route("/batches/:id/destroy", post(destroy))
        .route("/batches/:id/waste-logs", get(waste_logs))
}
