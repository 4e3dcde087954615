//! Waste logs

use sqlx::{Row, SqliteConnection};
use uuid::Uuid;
use verdant_common::time;

use super::parse_uuid;
use crate::error::Result;
use crate::models::WasteLog;

pub async fn insert_waste_log(conn: &mut SqliteConnection, log: &WasteLog) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO waste_logs (id, batch_id, plant_count, reason, logged_by, logged_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(log.id.to_string())
    .bind(log.batch_id.to_string())
    .bind(log.plant_count)
    .bind(&log.reason)
    .bind(&log.logged_by)
    .bind(time::to_db(log.timestamp))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_waste_logs(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<Vec<WasteLog>> {
    let rows = sqlx::query(
        "SELECT id, batch_id, plant_count, reason, logged_by, logged_at FROM waste_logs WHERE batch_id = ? ORDER BY logged_at",
    )
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<WasteLog> {
            Ok(WasteLog {
                id: parse_uuid("id", row.get("id"))?,
                batch_id: parse_uuid("batch_id", row.get("batch_id"))?,
                plant_count: row.get("plant_count"),
                reason: row.get("reason"),
                logged_by: row.get("logged_by"),
                timestamp: time::from_db("logged_at", row.get("logged_at"))?,
            })
        })
        .collect()
}
