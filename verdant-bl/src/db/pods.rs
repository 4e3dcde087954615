//! Pod registry mirror and pod assignments

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;
use verdant_common::time;

use super::parse_uuid;
use crate::error::{LifecycleError, Result};
use crate::models::{Pod, PodAssignment};

/// Insert or refresh a pod from the registry
pub async fn upsert_pod(conn: &mut SqliteConnection, pod: &Pod) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pods (id, name, site_id, capacity) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            site_id = excluded.site_id,
            capacity = excluded.capacity,
            version = pods.version + 1
        "#,
    )
    .bind(pod.id.to_string())
    .bind(&pod.name)
    .bind(&pod.site_id)
    .bind(pod.capacity)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Load a pod with its current version
pub async fn load_pod(conn: &mut SqliteConnection, pod_id: Uuid) -> Result<(Pod, i64)> {
    let row = sqlx::query("SELECT id, name, site_id, capacity, version FROM pods WHERE id = ?")
        .bind(pod_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LifecycleError::not_found("pod", pod_id))?;

    let pod = Pod {
        id: parse_uuid("id", row.get("id"))?,
        name: row.get("name"),
        site_id: row.get("site_id"),
        capacity: row.get("capacity"),
    };
    Ok((pod, row.get("version")))
}

/// Claim the pod for this transaction's capacity decision
pub async fn bump_pod_version(
    conn: &mut SqliteConnection,
    pod_id: Uuid,
    expected_version: i64,
) -> Result<()> {
    let result = sqlx::query("UPDATE pods SET version = version + 1 WHERE id = ? AND version = ?")
        .bind(pod_id.to_string())
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(LifecycleError::ConcurrentModification {
            entity: "pod",
            id: pod_id,
        });
    }
    Ok(())
}

/// Plants across active assignments of a pod
pub async fn active_plant_count(conn: &mut SqliteConnection, pod_id: Uuid) -> Result<i64> {
    let used: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(plant_count), 0) FROM pod_assignments WHERE pod_id = ? AND removed_at IS NULL",
    )
    .bind(pod_id.to_string())
    .fetch_one(&mut *conn)
    .await?;
    Ok(used)
}

pub async fn insert_assignment(conn: &mut SqliteConnection, assignment: &PodAssignment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pod_assignments (id, batch_id, pod_id, plant_count, assigned_at, removed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(assignment.id.to_string())
    .bind(assignment.batch_id.to_string())
    .bind(assignment.pod_id.to_string())
    .bind(assignment.plant_count)
    .bind(time::to_db(assignment.assigned_at))
    .bind(assignment.removed_at.map(time::to_db))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn load_assignment(conn: &mut SqliteConnection, assignment_id: Uuid) -> Result<PodAssignment> {
    let row = sqlx::query(
        "SELECT id, batch_id, pod_id, plant_count, assigned_at, removed_at FROM pod_assignments WHERE id = ?",
    )
    .bind(assignment_id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| LifecycleError::not_found("pod assignment", assignment_id))?;

    assignment_from_row(&row)
}

/// End an active assignment; returns false if it was already released
pub async fn end_assignment(
    conn: &mut SqliteConnection,
    assignment_id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE pod_assignments SET removed_at = ? WHERE id = ? AND removed_at IS NULL",
    )
    .bind(time::to_db(at))
    .bind(assignment_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// End every active assignment of a batch; returns how many were released
pub async fn end_batch_assignments(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    at: DateTime<Utc>,
) -> Result<usize> {
    let result = sqlx::query(
        "UPDATE pod_assignments SET removed_at = ? WHERE batch_id = ? AND removed_at IS NULL",
    )
    .bind(time::to_db(at))
    .bind(batch_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() as usize)
}

pub async fn list_batch_assignments(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    active_only: bool,
) -> Result<Vec<PodAssignment>> {
    let sql = if active_only {
        "SELECT id, batch_id, pod_id, plant_count, assigned_at, removed_at FROM pod_assignments WHERE batch_id = ? AND removed_at IS NULL ORDER BY assigned_at"
    } else {
        "SELECT id, batch_id, pod_id, plant_count, assigned_at, removed_at FROM pod_assignments WHERE batch_id = ? ORDER BY assigned_at"
    };

    let rows = sqlx::query(sql)
        .bind(batch_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(assignment_from_row).collect()
}

fn assignment_from_row(row: &SqliteRow) -> Result<PodAssignment> {
    Ok(PodAssignment {
        id: parse_uuid("id", row.get("id"))?,
        batch_id: parse_uuid("batch_id", row.get("batch_id"))?,
        pod_id: parse_uuid("pod_id", row.get("pod_id"))?,
        plant_count: row.get("plant_count"),
        assigned_at: time::from_db("assigned_at", row.get("assigned_at"))?,
        removed_at: time::from_db_opt("removed_at", row.get("removed_at"))?,
    })
}
