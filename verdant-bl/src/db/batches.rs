//! Batch persistence

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::collections::BTreeSet;
use uuid::Uuid;
use verdant_common::time;

use super::{format_date, is_unique_violation, parse_column, parse_date, parse_uuid, parse_uuid_opt};
use crate::error::{LifecycleError, Result};
use crate::models::Batch;

const BATCH_COLUMNS: &str = r#"
    id, domain_type, batch_number, stage, status, plant_count, site_id,
    cultivar_id, quarantine_reason, start_date, expected_harvest_date,
    external_batch_id, active_activation_id, version, created_at, updated_at
"#;

pub async fn insert_batch(conn: &mut SqliteConnection, batch: &Batch) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO batches (
            id, domain_type, batch_number, stage, status, plant_count, site_id,
            cultivar_id, quarantine_reason, start_date, expected_harvest_date,
            external_batch_id, active_activation_id, version, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(batch.domain_type.as_str())
    .bind(&batch.batch_number)
    .bind(batch.stage.as_str())
    .bind(batch.status.as_str())
    .bind(batch.plant_count)
    .bind(&batch.site_id)
    .bind(&batch.cultivar_id)
    .bind(&batch.quarantine_reason)
    .bind(format_date(batch.start_date))
    .bind(batch.expected_harvest_date.map(format_date))
    .bind(&batch.external_batch_id)
    .bind(batch.active_activation_id.map(|id| id.to_string()))
    .bind(batch.version)
    .bind(time::to_db(batch.created_at))
    .bind(time::to_db(batch.updated_at))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(LifecycleError::Validation(format!(
            "batch number '{}' already exists",
            batch.batch_number
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Load a batch with its tag set
pub async fn load_batch(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<Batch> {
    let row = sqlx::query(&format!("SELECT {} FROM batches WHERE id = ?", BATCH_COLUMNS))
        .bind(batch_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LifecycleError::not_found("batch", batch_id))?;

    let mut batch = batch_from_row(&row)?;
    batch.tags = load_tags(conn, batch_id).await?;
    Ok(batch)
}

pub async fn load_tags(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<BTreeSet<String>> {
    let tags: Vec<String> = sqlx::query_scalar("SELECT tag FROM plant_tags WHERE batch_id = ?")
        .bind(batch_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    Ok(tags.into_iter().collect())
}

/// Write mutable columns if nobody committed since `batch` was read
///
/// Bumps `batch.version` on success; `ConcurrentModification` when the
/// stored version moved on.
pub async fn save_batch(conn: &mut SqliteConnection, batch: &mut Batch) -> Result<()> {
    let updated_at = time::now();
    let result = sqlx::query(
        r#"
        UPDATE batches SET
            stage = ?, status = ?, plant_count = ?, quarantine_reason = ?,
            external_batch_id = ?, active_activation_id = ?,
            version = version + 1, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(batch.stage.as_str())
    .bind(batch.status.as_str())
    .bind(batch.plant_count)
    .bind(&batch.quarantine_reason)
    .bind(&batch.external_batch_id)
    .bind(batch.active_activation_id.map(|id| id.to_string()))
    .bind(time::to_db(updated_at))
    .bind(batch.id.to_string())
    .bind(batch.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LifecycleError::ConcurrentModification {
            entity: "batch",
            id: batch.id,
        });
    }

    batch.version += 1;
    batch.updated_at = updated_at;
    Ok(())
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let expected_harvest_date: Option<String> = row.get("expected_harvest_date");

    Ok(Batch {
        id: parse_uuid("id", row.get("id"))?,
        domain_type: parse_column("domain_type", row.get("domain_type"))?,
        batch_number: row.get("batch_number"),
        stage: parse_column("stage", row.get("stage"))?,
        status: parse_column("status", row.get("status"))?,
        plant_count: row.get("plant_count"),
        site_id: row.get("site_id"),
        cultivar_id: row.get("cultivar_id"),
        quarantine_reason: row.get("quarantine_reason"),
        start_date: parse_date("start_date", row.get("start_date"))?,
        expected_harvest_date: expected_harvest_date
            .map(|d| parse_date("expected_harvest_date", &d))
            .transpose()?,
        external_batch_id: row.get("external_batch_id"),
        tags: BTreeSet::new(),
        active_activation_id: parse_uuid_opt("active_activation_id", row.get("active_activation_id"))?,
        version: row.get("version"),
        created_at: time::from_db("created_at", row.get("created_at"))?,
        updated_at: time::from_db("updated_at", row.get("updated_at"))?,
    })
}
