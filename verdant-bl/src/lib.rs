//! verdant-bl library interface
//!
//! Batch lifecycle core: stage graphs, batch state machine, quarantine,
//! plant tags, pod placement, recipe tracking, harvest and inventory
//! posting, destruction, and regulatory sync.

pub mod api;
pub mod cadence;
pub mod collaborators;
pub mod db;
pub mod error;
pub mod jurisdiction;
pub mod models;
pub mod services;
pub mod sync;
pub mod utils;

pub use crate::error::{LifecycleError, Result};
pub use crate::jurisdiction::Jurisdiction;
pub use crate::services::LifecycleService;

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use verdant_common::events::EventBus;

use crate::collaborators::{InMemoryTelemetryFeed, SqliteInventory};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: LifecycleService,
    /// Push side of the telemetry feed the service reads from
    pub telemetry: Arc<InMemoryTelemetryFeed>,
    /// Item catalog of the bundled inventory service
    pub inventory: Arc<SqliteInventory>,
    pub event_bus: EventBus,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        service: LifecycleService,
        telemetry: Arc<InMemoryTelemetryFeed>,
        inventory: Arc<SqliteInventory>,
    ) -> Self {
        let event_bus = service.event_bus().clone();
        Self {
            service,
            telemetry,
            inventory,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::batch_routes())
        .merge(api::pod_routes())
        .merge(api::recipe_routes())
        .merge(api::harvest_routes())
        .merge(api::sync_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
