//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates every table the
//! lifecycle service needs. Table creation is idempotent, so it runs on
//! every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
///
/// Foreign keys, WAL and the busy timeout are connection options so every
/// pooled connection gets them.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Initialize a private in-memory database
///
/// A single connection that never expires; SQLite gives each connection its
/// own in-memory database, so the pool must not open a second one.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_pods_table(pool).await?;
    create_batches_table(pool).await?;
    create_stage_history_table(pool).await?;
    create_batch_events_table(pool).await?;
    create_pod_assignments_table(pool).await?;
    create_plant_tags_table(pool).await?;

    // Recipe tables
    create_recipes_table(pool).await?;
    create_recipe_versions_table(pool).await?;
    create_recipe_stages_table(pool).await?;
    create_setpoints_table(pool).await?;
    create_recipe_activations_table(pool).await?;

    // Harvest, inventory and waste
    create_harvest_records_table(pool).await?;
    create_plant_harvest_entries_table(pool).await?;
    create_inventory_items_table(pool).await?;
    create_inventory_usage_table(pool).await?;
    create_waste_logs_table(pool).await?;

    create_sync_jobs_table(pool).await?;

    info!("Database schema ready");
    Ok(())
}

/// Pod registry mirror. `version` serializes concurrent capacity checks.
async fn create_pods_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pods (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            site_id TEXT NOT NULL,
            capacity INTEGER NOT NULL CHECK (capacity >= 0),
            version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Batch aggregate. `version` is bumped by every committed mutation.
async fn create_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            domain_type TEXT NOT NULL,
            batch_number TEXT NOT NULL UNIQUE,
            stage TEXT NOT NULL,
            status TEXT NOT NULL,
            plant_count INTEGER NOT NULL CHECK (plant_count >= 0),
            site_id TEXT NOT NULL,
            cultivar_id TEXT NOT NULL,
            quarantine_reason TEXT,
            start_date TEXT NOT NULL,
            expected_harvest_date TEXT,
            external_batch_id TEXT,
            active_activation_id TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stage_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            stage TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one open entry per batch
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_stage_history_open
        ON stage_history(batch_id) WHERE ended_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_batch_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            event_type TEXT NOT NULL,
            actor TEXT NOT NULL,
            notes TEXT,
            occurred_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_batch_events_batch ON batch_events(batch_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_pod_assignments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pod_assignments (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            pod_id TEXT NOT NULL REFERENCES pods(id),
            plant_count INTEGER NOT NULL CHECK (plant_count > 0),
            assigned_at TEXT NOT NULL,
            removed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pod_assignments_pod ON pod_assignments(pod_id, removed_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Regulator-issued tags are globally unique
async fn create_plant_tags_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plant_tags (
            tag TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            assigned_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_plant_tags_batch ON plant_tags(batch_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_recipes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recipe_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipe_versions (
            id TEXT PRIMARY KEY,
            recipe_id TEXT NOT NULL REFERENCES recipes(id),
            version INTEGER NOT NULL,
            UNIQUE (recipe_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recipe_stages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipe_stages (
            id TEXT PRIMARY KEY,
            recipe_version_id TEXT NOT NULL REFERENCES recipe_versions(id),
            stage_order INTEGER NOT NULL,
            name TEXT NOT NULL,
            duration_days INTEGER NOT NULL CHECK (duration_days > 0),
            UNIQUE (recipe_version_id, stage_order)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_setpoints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS setpoints (
            recipe_version_id TEXT NOT NULL REFERENCES recipe_versions(id),
            stage_id TEXT NOT NULL REFERENCES recipe_stages(id),
            parameter_type TEXT NOT NULL,
            min_value REAL NOT NULL,
            max_value REAL NOT NULL,
            PRIMARY KEY (recipe_version_id, stage_id, parameter_type),
            CHECK (min_value <= max_value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recipe_activations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipe_activations (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            recipe_id TEXT NOT NULL REFERENCES recipes(id),
            recipe_version_id TEXT NOT NULL REFERENCES recipe_versions(id),
            current_stage_id TEXT NOT NULL REFERENCES recipe_stages(id),
            current_stage_day INTEGER NOT NULL,
            active INTEGER NOT NULL,
            activated_at TEXT NOT NULL,
            activated_by TEXT NOT NULL,
            deactivated_at TEXT,
            deactivated_by TEXT,
            deactivation_reason TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active activation per batch
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_recipe_activations_active
        ON recipe_activations(batch_id) WHERE active = 1
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_harvest_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_records (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            wet_weight REAL NOT NULL,
            dry_weight REAL,
            waste_weight REAL,
            notes TEXT,
            recorded_by TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            inventory_entry_id TEXT,
            inventory_posting_claim TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_plant_harvest_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plant_harvest_entries (
            harvest_id TEXT NOT NULL REFERENCES harvest_records(id),
            tag TEXT NOT NULL REFERENCES plant_tags(tag),
            wet_weight REAL NOT NULL,
            PRIMARY KEY (harvest_id, tag)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Item catalog of the bundled inventory collaborator
async fn create_inventory_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inventory_items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            unit TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_inventory_usage_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inventory_usage (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            item_id TEXT NOT NULL REFERENCES inventory_items(id),
            movement_type TEXT NOT NULL,
            quantity REAL NOT NULL,
            unit TEXT NOT NULL,
            lot_code TEXT NOT NULL,
            posted_at TEXT NOT NULL,
            idempotency_key TEXT UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_waste_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS waste_logs (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            plant_count INTEGER NOT NULL,
            reason TEXT NOT NULL,
            logged_by TEXT NOT NULL,
            logged_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Outbox of regulator phase changes. `seq` orders jobs of one batch.
async fn create_sync_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_jobs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            external_batch_id TEXT NOT NULL,
            from_phase TEXT NOT NULL,
            to_phase TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT NOT NULL,
            last_error TEXT,
            confirmation_id TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_jobs_batch_status ON sync_jobs(batch_id, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
