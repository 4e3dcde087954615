//! Harvest records and per-plant weights

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;
use verdant_common::time;

use super::{parse_uuid, parse_uuid_opt};
use crate::error::{LifecycleError, Result};
use crate::models::{HarvestRecord, PlantWeight};

const HARVEST_COLUMNS: &str = "id, batch_id, wet_weight, dry_weight, waste_weight, notes, recorded_by, recorded_at, inventory_entry_id";

pub async fn insert_harvest(conn: &mut SqliteConnection, harvest: &HarvestRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO harvest_records (
            id, batch_id, wet_weight, dry_weight, waste_weight, notes,
            recorded_by, recorded_at, inventory_entry_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(harvest.id.to_string())
    .bind(harvest.batch_id.to_string())
    .bind(harvest.wet_weight)
    .bind(harvest.dry_weight)
    .bind(harvest.waste_weight)
    .bind(&harvest.notes)
    .bind(&harvest.recorded_by)
    .bind(time::to_db(harvest.recorded_at))
    .bind(harvest.inventory_entry_id.map(|id| id.to_string()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_plant_weight(
    conn: &mut SqliteConnection,
    harvest_id: Uuid,
    entry: &PlantWeight,
) -> Result<()> {
    sqlx::query("INSERT INTO plant_harvest_entries (harvest_id, tag, wet_weight) VALUES (?, ?, ?)")
        .bind(harvest_id.to_string())
        .bind(&entry.tag)
        .bind(entry.wet_weight)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn load_harvest(conn: &mut SqliteConnection, harvest_id: Uuid) -> Result<HarvestRecord> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM harvest_records WHERE id = ?",
        HARVEST_COLUMNS
    ))
    .bind(harvest_id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| LifecycleError::not_found("harvest", harvest_id))?;

    harvest_from_row(&row)
}

pub async fn list_harvests(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<Vec<HarvestRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM harvest_records WHERE batch_id = ? ORDER BY recorded_at",
        HARVEST_COLUMNS
    ))
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(harvest_from_row).collect()
}

pub async fn list_plant_weights(
    conn: &mut SqliteConnection,
    harvest_id: Uuid,
) -> Result<Vec<PlantWeight>> {
    let rows = sqlx::query(
        "SELECT tag, wet_weight FROM plant_harvest_entries WHERE harvest_id = ? ORDER BY tag",
    )
    .bind(harvest_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PlantWeight {
            tag: row.get("tag"),
            wet_weight: row.get("wet_weight"),
        })
        .collect())
}

/// Take the exclusive right to post this harvest's receipt
///
/// False when the harvest is already posted or another posting holds the
/// claim.
pub async fn claim_inventory_posting(
    conn: &mut SqliteConnection,
    harvest_id: Uuid,
    claim_id: Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE harvest_records SET inventory_posting_claim = ?
        WHERE id = ? AND inventory_entry_id IS NULL AND inventory_posting_claim IS NULL
        "#,
    )
    .bind(claim_id.to_string())
    .bind(harvest_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Drop a claim after the posting failed so it can be retried
pub async fn release_inventory_claim(
    conn: &mut SqliteConnection,
    harvest_id: Uuid,
    claim_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "UPDATE harvest_records SET inventory_posting_claim = NULL WHERE id = ? AND inventory_posting_claim = ?",
    )
    .bind(harvest_id.to_string())
    .bind(claim_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Link the posted receipt and clear the claim
///
/// Idempotent for the same entry; false if the harvest is linked to
/// another one.
pub async fn set_inventory_entry(
    conn: &mut SqliteConnection,
    harvest_id: Uuid,
    entry_id: Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE harvest_records SET inventory_entry_id = ?, inventory_posting_claim = NULL
        WHERE id = ? AND (inventory_entry_id IS NULL OR inventory_entry_id = ?)
        "#,
    )
    .bind(entry_id.to_string())
    .bind(harvest_id.to_string())
    .bind(entry_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

fn harvest_from_row(row: &SqliteRow) -> Result<HarvestRecord> {
    Ok(HarvestRecord {
        id: parse_uuid("id", row.get("id"))?,
        batch_id: parse_uuid("batch_id", row.get("batch_id"))?,
        wet_weight: row.get("wet_weight"),
        dry_weight: row.get("dry_weight"),
        waste_weight: row.get("waste_weight"),
        notes: row.get("notes"),
        recorded_by: row.get("recorded_by"),
        recorded_at: time::from_db("recorded_at", row.get("recorded_at"))?,
        inventory_entry_id: parse_uuid_opt("inventory_entry_id", row.get("inventory_entry_id"))?,
    })
}
