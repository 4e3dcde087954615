//! Harvest recording and inventory posting

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::collaborators::InventoryItem;
use crate::error::Result;
use crate::models::{
    HarvestInput, HarvestOutcome, HarvestRecord, InventoryPostingRequest, InventoryUsageEntry,
    PlantWeight,
};
use crate::AppState;

/// POST /batches/:id/harvests request
///
/// With `plants` the per-plant weights are reconciled against `wet_weight`.
#[derive(Debug, Deserialize)]
pub struct RecordHarvestRequest {
    pub actor: String,
    #[serde(flatten)]
    pub input: HarvestInput,
    #[serde(default)]
    pub plants: Vec<PlantWeight>,
    #[serde(default)]
    pub inventory: Option<InventoryPostingRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PostInventoryRequest {
    pub actor: String,
    #[serde(flatten)]
    pub request: InventoryPostingRequest,
}

#[derive(Debug, Deserialize)]
pub struct RegisterItemRequest {
    pub name: String,
    pub unit: String,
}

/// POST /batches/:id/harvests
///
/// 201 when everything requested succeeded, 207 when the harvest was
/// recorded but the inventory posting failed.
pub async fn record_harvest(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<RecordHarvestRequest>,
) -> Result<(StatusCode, Json<HarvestOutcome>)> {
    let outcome = if request.plants.is_empty() {
        state
            .service
            .record_harvest(batch_id, request.input, request.inventory, &request.actor)
            .await?
    } else {
        state
            .service
            .record_plant_harvest(
                batch_id,
                request.input,
                &request.plants,
                request.inventory,
                &request.actor,
            )
            .await?
    };

    let status = if outcome.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// GET /batches/:id/harvests
pub async fn list_harvests(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Vec<HarvestRecord>>> {
    Ok(Json(state.service.harvests(batch_id).await?))
}

/// GET /harvests/:id/plants
pub async fn plant_weights(
    State(state): State<AppState>,
    Path(harvest_id): Path<Uuid>,
) -> Result<Json<Vec<PlantWeight>>> {
    Ok(Json(state.service.plant_weights(harvest_id).await?))
}

/// POST /harvests/:id/inventory
pub async fn post_inventory(
    State(state): State<AppState>,
    Path(harvest_id): Path<Uuid>,
    Json(request): Json<PostInventoryRequest>,
) -> Result<(StatusCode, Json<InventoryUsageEntry>)> {
    let entry = state
        .service
        .post_harvest_inventory(harvest_id, request.request, &request.actor)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// POST /inventory/items
pub async fn register_item(
    State(state): State<AppState>,
    Json(request): Json<RegisterItemRequest>,
) -> Result<(StatusCode, Json<InventoryItem>)> {
    let item = state
        .inventory
        .register_item(&request.name, &request.unit)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// GET /batches/:id/inventory
pub async fn batch_inventory(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Vec<InventoryUsageEntry>>> {
    state.service.get_batch(batch_id).await?;
    Ok(Json(state.inventory.usage_for_batch(batch_id).await?))
}

pub fn harvest_routes() -> Router<AppState> {
    Router::new()
        .route("/batches/:id/harvests", post(record_harvest).get(list_harvests))
        .route("/harvests/:id/plants", get(plant_weights))
        .route("/harvests/:id/inventory", post(post_inventory))
        .route("/inventory/items", post(register_item))
        .route("/batches/:id/inventory", get(batch_inventory))
}
