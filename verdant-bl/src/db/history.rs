//! Stage history and audit events (append-only)

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;
use verdant_common::time;

use super::{parse_column, parse_uuid};
use crate::error::{LifecycleError, Result};
use crate::models::{BatchEvent, EventType, Stage, StageHistoryEntry};

pub async fn open_stage(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    stage: Stage,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO stage_history (batch_id, stage, started_at) VALUES (?, ?, ?)")
        .bind(batch_id.to_string())
        .bind(stage.as_str())
        .bind(time::to_db(at))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Close the open entry; fails if the batch has none
pub async fn close_open_stage(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE stage_history SET ended_at = ? WHERE batch_id = ? AND ended_at IS NULL",
    )
    .bind(time::to_db(at))
    .bind(batch_id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(LifecycleError::Common(verdant_common::Error::Internal(format!(
            "batch {} has {} open stage history entries",
            batch_id,
            result.rows_affected()
        ))));
    }
    Ok(())
}

pub async fn list_stage_history(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
) -> Result<Vec<StageHistoryEntry>> {
    let rows = sqlx::query(
        "SELECT stage, started_at, ended_at FROM stage_history WHERE batch_id = ? ORDER BY id",
    )
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<StageHistoryEntry> {
            Ok(StageHistoryEntry {
                batch_id,
                stage: parse_column("stage", row.get("stage"))?,
                started_at: time::from_db("started_at", row.get("started_at"))?,
                ended_at: time::from_db_opt("ended_at", row.get("ended_at"))?,
            })
        })
        .collect()
}

pub async fn append_event(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    event_type: EventType,
    actor: &str,
    notes: Option<&str>,
    at: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO batch_events (batch_id, event_type, actor, notes, occurred_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch_id.to_string())
    .bind(event_type.as_str())
    .bind(actor)
    .bind(notes)
    .bind(time::to_db(at))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn list_events(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<Vec<BatchEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT id, batch_id, event_type, actor, notes, occurred_at
        FROM batch_events WHERE batch_id = ? ORDER BY id
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<BatchEvent> {
            Ok(BatchEvent {
                id: row.get("id"),
                batch_id: parse_uuid("batch_id", row.get("batch_id"))?,
                event_type: parse_column("event_type", row.get("event_type"))?,
                actor: row.get("actor"),
                notes: row.get("notes"),
                occurred_at: time::from_db("occurred_at", row.get("occurred_at"))?,
            })
        })
        .collect()
}
