//! Recipe catalog, activations, telemetry intake and setpoint evaluation

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    NewRecipeStage, RecipeActivation, RecipeDefinition, SetpointEvaluation, TelemetryReading,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DefineRecipeRequest {
    pub name: String,
    pub stages: Vec<NewRecipeStage>,
}

#[derive(Debug, Deserialize)]
pub struct AddVersionRequest {
    pub stages: Vec<NewRecipeStage>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRecipeRequest {
    pub actor: String,
    pub recipe_id: Uuid,
    pub recipe_version_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRecipeRequest {
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /batches/:id/evaluate request
///
/// With a `reading` that reading is evaluated; without one the latest
/// reading of every assigned pod is taken from the telemetry feed.
#[derive(Debug, Default, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub reading: Option<TelemetryReading>,
}

/// POST /pods/:id/telemetry request
#[derive(Debug, Deserialize)]
pub struct TelemetryRequest {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub co2: Option<f64>,
    #[serde(default)]
    pub lights_on: Option<bool>,
}

/// POST /recipes
pub async fn define_recipe(
    State(state): State<AppState>,
    Json(request): Json<DefineRecipeRequest>,
) -> Result<(StatusCode, Json<RecipeDefinition>)> {
    let definition = state
        .service
        .define_recipe(&request.name, &request.stages)
        .await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

/// POST /recipes/:id/versions
pub async fn add_version(
    State(state): State<AppState>,
    Path(recipe_id): Path<Uuid>,
    Json(request): Json<AddVersionRequest>,
) -> Result<(StatusCode, Json<RecipeDefinition>)> {
    let definition = state
        .service
        .add_recipe_version(recipe_id, &request.stages)
        .await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

/// POST /batches/:id/recipes
pub async fn activate_recipe(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<ActivateRecipeRequest>,
) -> Result<(StatusCode, Json<RecipeActivation>)> {
    let activation = state
        .service
        .activate_recipe(
            batch_id,
            request.recipe_id,
            request.recipe_version_id,
            &request.actor,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(activation)))
}

/// GET /batches/:id/recipes/active
pub async fn active_recipe(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<Option<RecipeActivation>>> {
    Ok(Json(state.service.active_recipe(batch_id).await?))
}

/// POST /recipe-activations/:id/deactivate
pub async fn deactivate_recipe(
    State(state): State<AppState>,
    Path(activation_id): Path<Uuid>,
    Json(request): Json<DeactivateRecipeRequest>,
) -> Result<Json<RecipeActivation>> {
    let activation = state
        .service
        .deactivate_recipe(activation_id, &request.actor, request.reason.as_deref())
        .await?;
    Ok(Json(activation))
}

/// POST /recipe-activations/:id/advance-day
pub async fn advance_day(
    State(state): State<AppState>,
    Path(activation_id): Path<Uuid>,
) -> Result<Json<RecipeActivation>> {
    Ok(Json(state.service.advance_recipe_day(activation_id).await?))
}

/// POST /batches/:id/evaluate
pub async fn evaluate(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<Vec<SetpointEvaluation>>> {
    let evaluations = match request.reading {
        Some(reading) => vec![state.service.evaluate(batch_id, &reading).await?],
        None => state.service.evaluate_latest(batch_id).await?,
    };
    Ok(Json(evaluations))
}

/// POST /pods/:id/telemetry
pub async fn record_telemetry(
    State(state): State<AppState>,
    Path(pod_id): Path<Uuid>,
    Json(request): Json<TelemetryRequest>,
) -> Result<StatusCode> {
    state.service.get_pod(pod_id).await?;
    state
        .telemetry
        .record(TelemetryReading {
            pod_id,
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
            temperature: request.temperature,
            humidity: request.humidity,
            co2: request.co2,
            lights_on: request.lights_on,
        })
        .await;
    Ok(StatusCode::ACCEPTED)
}

pub fn recipe_routes() -> Router<AppState> {
    Router::new()
        .route("/recipes", post(define_recipe))
        .route("/recipes/:id/versions", post(add_version))
        .route("/batches/:id/recipes", post(activate_recipe))
        .route("/batches/:id/recipes/active", get(active_recipe))
        .route("/recipe-activations/:id/deactivate", post(deactivate_recipe))
        .route("/recipe-activations/:id/advance-day", post(advance_day))
        .route("/batches/:id/evaluate", post(evaluate))
        .route("/pods/:id/telemetry", post(record_telemetry))
}
