//! Plant tag ownership

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;
use verdant_common::time;

use super::{is_unique_violation, parse_uuid_opt};
use crate::error::{LifecycleError, Result};

/// Batch currently holding `tag`, if any
pub async fn tag_owner(conn: &mut SqliteConnection, tag: &str) -> Result<Option<Uuid>> {
    let owner: Option<String> = sqlx::query_scalar("SELECT batch_id FROM plant_tags WHERE tag = ?")
        .bind(tag)
        .fetch_optional(&mut *conn)
        .await?;
    parse_uuid_opt("batch_id", owner)
}

/// A unique violation means another batch took the tag after it was checked
pub async fn insert_tag(
    conn: &mut SqliteConnection,
    tag: &str,
    batch_id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query("INSERT INTO plant_tags (tag, batch_id, assigned_at) VALUES (?, ?, ?)")
        .bind(tag)
        .bind(batch_id.to_string())
        .bind(time::to_db(at))
        .execute(&mut *conn)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(LifecycleError::ConcurrentModification {
            entity: "plant tag",
            id: batch_id,
        }),
        Err(e) => Err(e.into()),
    }
}
