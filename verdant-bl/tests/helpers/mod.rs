//! Shared fixtures for verdant-bl integration tests
//!
//! Every test owns a private in-memory database.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use verdant_bl::collaborators::{
    InMemoryTelemetryFeed, InventoryReceipt, InventoryService, SqliteInventory,
};
use verdant_bl::models::{Domain, InventoryUsageEntry, NewBatch, PhaseChangeJob, Stage};
use verdant_bl::sync::{RegulatoryClient, SyncCoordinator, SyncReceipt};
use verdant_bl::{Jurisdiction, LifecycleError, LifecycleService};
use verdant_common::config::{JurisdictionConfig, SyncSettings};
use verdant_common::events::EventBus;

pub const ACTOR: &str = "grower@test";

pub struct TestContext {
    pub service: LifecycleService,
    pub pool: SqlitePool,
    pub inventory: Arc<SqliteInventory>,
    pub telemetry: Arc<InMemoryTelemetryFeed>,
    pub event_bus: EventBus,
}

/// Jurisdiction with every requirement switched on
pub fn jurisdiction_config() -> JurisdictionConfig {
    JurisdictionConfig {
        code: "TEST".to_string(),
        requires_external_sync: true,
        requires_plant_tags: true,
        allowed_stages: None,
        manifest_required_on_destroy: true,
        tag_pattern: "[0-9A-Z]{24}".to_string(),
        harvest_tolerance_percent: 2.0,
    }
}

pub async fn setup() -> TestContext {
    setup_with(jurisdiction_config()).await
}

pub async fn setup_with(config: JurisdictionConfig) -> TestContext {
    let pool = verdant_common::db::init_memory_database().await.unwrap();
    let inventory = Arc::new(SqliteInventory::new(pool.clone()));
    build_context(pool, config, inventory.clone(), inventory).await
}

/// Service whose inventory collaborator always fails
pub async fn setup_with_failing_inventory() -> TestContext {
    let pool = verdant_common::db::init_memory_database().await.unwrap();
    let inventory = Arc::new(SqliteInventory::new(pool.clone()));
    build_context(pool, jurisdiction_config(), inventory, Arc::new(FailingInventory)).await
}

/// File-backed database for tests that need several connections
pub async fn setup_file_backed(dir: &tempfile::TempDir) -> TestContext {
    let pool = verdant_common::db::init_database(&dir.path().join("verdant.db"))
        .await
        .unwrap();
    let inventory = Arc::new(SqliteInventory::new(pool.clone()));
    build_context(pool, jurisdiction_config(), inventory.clone(), inventory).await
}

async fn build_context(
    pool: SqlitePool,
    config: JurisdictionConfig,
    inventory: Arc<SqliteInventory>,
    inventory_service: Arc<dyn InventoryService>,
) -> TestContext {
    let jurisdiction = Jurisdiction::from_config(&config).unwrap();
    let event_bus = EventBus::new(256);
    let telemetry = Arc::new(InMemoryTelemetryFeed::new());
    let service = LifecycleService::new(
        pool.clone(),
        jurisdiction,
        event_bus.clone(),
        inventory_service,
        telemetry.clone(),
    );

    TestContext {
        service,
        pool,
        inventory,
        telemetry,
        event_bus,
    }
}

pub fn cannabis_batch(batch_number: &str, stage: Stage, plant_count: i64) -> NewBatch {
    NewBatch {
        domain_type: Domain::Cannabis,
        batch_number: batch_number.to_string(),
        stage,
        plant_count,
        site_id: "site-1".to_string(),
        cultivar_id: "blue-dream".to_string(),
        start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        expected_harvest_date: None,
        external_batch_id: Some(format!("EXT-{}", batch_number)),
    }
}

pub fn produce_batch(batch_number: &str, stage: Stage, plant_count: i64) -> NewBatch {
    NewBatch {
        domain_type: Domain::Produce,
        batch_number: batch_number.to_string(),
        stage,
        plant_count,
        site_id: "site-1".to_string(),
        cultivar_id: "butterhead".to_string(),
        start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        expected_harvest_date: None,
        external_batch_id: None,
    }
}

/// Valid 24-character seed-to-sale tag
pub fn tag(n: u32) -> String {
    format!("1A4FF01000000220000{:05}", n)
}

pub fn tags(range: std::ops::Range<u32>) -> Vec<String> {
    range.map(tag).collect()
}

/// Fast retry settings: no backoff, three attempts
pub fn sync_settings() -> SyncSettings {
    SyncSettings {
        max_attempts: 3,
        base_backoff_ms: 0,
        max_backoff_ms: 0,
        request_timeout_ms: 200,
        concurrency: 4,
        poll_interval_ms: 10,
    }
}

pub fn coordinator(
    ctx: &TestContext,
    client: Arc<MockRegulatoryClient>,
    settings: SyncSettings,
) -> SyncCoordinator {
    SyncCoordinator::new(
        ctx.pool.clone(),
        client,
        settings,
        ctx.service.sync_notify(),
        ctx.event_bus.clone(),
    )
}

/// Scripted regulator response
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Confirm(String),
    Reject(String),
    Error(String),
    /// Never answers within the request timeout
    Hang,
}

/// Regulator double: plays scripted outcomes, then confirms everything
#[derive(Default)]
pub struct MockRegulatoryClient {
    script: Mutex<VecDeque<MockOutcome>>,
    calls: Mutex<Vec<PhaseChangeJob>>,
}

impl MockRegulatoryClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(outcomes: Vec<MockOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<PhaseChangeJob> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegulatoryClient for MockRegulatoryClient {
    async fn report_phase_change(&self, job: &PhaseChangeJob) -> verdant_bl::Result<SyncReceipt> {
        self.calls.lock().unwrap().push(job.clone());
        let outcome = self.script.lock().unwrap().pop_front();

        match outcome {
            None => Ok(SyncReceipt {
                success: true,
                confirmation_id: Some(format!("CONF-{}", job.to_phase)),
                message: None,
            }),
            Some(MockOutcome::Confirm(id)) => Ok(SyncReceipt {
                success: true,
                confirmation_id: Some(id),
                message: None,
            }),
            Some(MockOutcome::Reject(message)) => Ok(SyncReceipt {
                success: false,
                confirmation_id: None,
                message: Some(message),
            }),
            Some(MockOutcome::Error(message)) => Err(LifecycleError::ExternalSyncFailure(message)),
            Some(MockOutcome::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(LifecycleError::ExternalSyncFailure("unreachable".to_string()))
            }
        }
    }
}

/// Inventory collaborator that is always down
pub struct FailingInventory;

#[async_trait]
impl InventoryService for FailingInventory {
    async fn post_receive(&self, _receipt: &InventoryReceipt) -> verdant_bl::Result<InventoryUsageEntry> {
        Err(LifecycleError::Validation("inventory service unavailable".to_string()))
    }
}

/// Create a cannabis batch and walk it to `stage` along the graph
pub async fn batch_in_stage(ctx: &TestContext, batch_number: &str, stage: Stage, plants: i64) -> Uuid {
    let path = [
        Stage::Seedling,
        Stage::Vegetative,
        Stage::Flowering,
        Stage::Harvest,
        Stage::Drying,
        Stage::Curing,
    ];
    let batch = ctx
        .service
        .create_batch(cannabis_batch(batch_number, Stage::Germination, plants), ACTOR)
        .await
        .unwrap();

    if stage != Stage::Germination {
        for next in path {
            ctx.service.transition(batch.id, next, ACTOR, None).await.unwrap();
            if next == stage {
                break;
            }
        }
    }
    batch.id
}
