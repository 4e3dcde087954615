//! HTTP API tests (router driven with tower `oneshot`)

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use verdant_bl::models::Stage;
use verdant_bl::{build_router, AppState};

use helpers::*;

fn app(ctx: &TestContext) -> Router {
    build_router(AppState::new(
        ctx.service.clone(),
        ctx.telemetry.clone(),
        ctx.inventory.clone(),
    ))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn create_body(batch_number: &str, stage: &str) -> Value {
    json!({
        "actor": ACTOR,
        "domain_type": "cannabis",
        "batch_number": batch_number,
        "stage": stage,
        "plant_count": 10,
        "site_id": "site-1",
        "cultivar_id": "blue-dream",
        "start_date": "2026-03-01",
        "external_batch_id": format!("EXT-{}", batch_number),
    })
}

#[tokio::test]
async fn test_health() {
    let ctx = setup().await;
    let (status, body) = send(&app(&ctx), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "verdant-bl");
    assert_eq!(body["jurisdiction"], "TEST");
}

#[tokio::test]
async fn test_create_and_transition_batch() {
    let ctx = setup().await;
    let app = app(&ctx);

    let (status, batch) = send(&app, "POST", "/batches", Some(create_body("API-1", "seedling"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(batch["stage"], "seedling");
    assert_eq!(batch["status"], "active");
    let id = batch["id"].as_str().unwrap().to_string();

    let (status, outcome) = send(
        &app,
        "POST",
        &format!("/batches/{}/transition", id),
        Some(json!({ "actor": ACTOR, "to": "vegetative" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["batch"]["stage"], "vegetative");
    assert_eq!(outcome["sync_enqueued"], true);

    let (status, next) = send(&app, "GET", &format!("/batches/{}/next-stages", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["next"], json!(["flowering"]));

    let (status, sync) = send(&app, "GET", &format!("/batches/{}/sync", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sync["latest"]["status"], "pending");
}

#[tokio::test]
async fn test_error_bodies_carry_codes() {
    let ctx = setup().await;
    let app = app(&ctx);

    let (status, body) = send(&app, "POST", "/batches", Some(create_body("API-2", "growing"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "UNKNOWN_STAGE");

    let (_, batch) = send(&app, "POST", "/batches", Some(create_body("API-3", "flowering"))).await;
    let id = batch["id"].as_str().unwrap();
    let (status, body) = send(
        &app,
        "POST",
        &format!("/batches/{}/transition", id),
        Some(json!({ "actor": ACTOR, "to": "vegetative" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = send(&app, "GET", &format!("/batches/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_quarantine_round_trip() {
    let ctx = setup().await;
    let app = app(&ctx);
    let batch_id = batch_in_stage(&ctx, "API-4", Stage::Vegetative, 10).await;

    let (status, batch) = send(
        &app,
        "POST",
        &format!("/batches/{}/quarantine", batch_id),
        Some(json!({ "actor": ACTOR, "reason": "powdery mildew" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["status"], "quarantined");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/batches/{}/transition", batch_id),
        Some(json!({ "actor": ACTOR, "to": "flowering" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "QUARANTINE_BLOCKED");

    let (status, batch) = send(
        &app,
        "POST",
        &format!("/batches/{}/release", batch_id),
        Some(json!({ "actor": ACTOR })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["status"], "active");
}

#[tokio::test]
async fn test_harvest_with_failed_posting_is_multi_status() {
    let ctx = setup().await;
    let app = app(&ctx);
    let batch_id = batch_in_stage(&ctx, "API-5", Stage::Harvest, 10).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/batches/{}/harvests", batch_id),
        Some(json!({
            "actor": ACTOR,
            "wet_weight": 500.0,
            "dry_weight": 120.0,
            "inventory": { "item_id": Uuid::new_v4() },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["inventory"]["status"], "failed");
    assert_eq!(body["inventory"]["code"], "NOT_FOUND");
    let harvest_id = body["harvest"]["id"].as_str().unwrap().to_string();

    let (status, harvests) = send(&app, "GET", &format!("/batches/{}/harvests", batch_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harvests.as_array().unwrap().len(), 1);

    let (status, item) = send(
        &app,
        "POST",
        "/inventory/items",
        Some(json!({ "name": "Dried flower", "unit": "g" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, entry) = send(
        &app,
        "POST",
        &format!("/harvests/{}/inventory", harvest_id),
        Some(json!({ "actor": ACTOR, "item_id": item["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["quantity"], 120.0);
}

#[tokio::test]
async fn test_destroy_requires_manifest_over_http() {
    let ctx = setup().await;
    let app = app(&ctx);
    let batch_id = batch_in_stage(&ctx, "API-6", Stage::Seedling, 10).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/batches/{}/destroy", batch_id),
        Some(json!({ "actor": ACTOR, "reason": "mold" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "MANIFEST_ACK_REQUIRED");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/batches/{}/destroy", batch_id),
        Some(json!({ "actor": ACTOR, "reason": "mold", "create_waste_log": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batch"]["status"], "destroyed");
    assert_eq!(body["waste_log"]["plant_count"], 10);
}
