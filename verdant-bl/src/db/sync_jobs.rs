//! Regulatory sync job outbox
//!
//! Jobs are inserted in the same transaction as the stage change that
//! produced them. Jobs of one batch are delivered strictly in `seq` order:
//! a job is due only while no earlier job of its batch is pending or in
//! flight, and a pending job behind a later in-flight or synced job is
//! superseded instead of delivered.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;
use verdant_common::time;

use super::{parse_column, parse_uuid};
use crate::error::{LifecycleError, Result};
use crate::models::{PhaseChangeJob, RegulatoryPhase, SyncJob, SyncStatus};

const JOB_COLUMNS: &str = r#"
    seq, id, batch_id, external_batch_id, from_phase, to_phase, occurred_at,
    status, attempts, next_attempt_at, last_error, confirmation_id, updated_at
"#;

/// Queue a phase change, collapsing still-pending jobs of the batch into it
///
/// The new job reports from the oldest pending `from_phase`. Returns `None`
/// when the collapsed change is a no-op (e.g. vegetative → flowering →
/// vegetative before anything was delivered).
pub async fn enqueue_phase_change(
    conn: &mut SqliteConnection,
    job: &PhaseChangeJob,
    now: DateTime<Utc>,
) -> Result<Option<SyncJob>> {
    let pending = jobs_with_status(conn, job.batch_id, SyncStatus::Pending).await?;

    let from_phase = pending.first().map_or(job.from_phase, |oldest| oldest.job.from_phase);
    for superseded in &pending {
        set_status(conn, superseded.id, SyncStatus::Superseded, now).await?;
        tracing::debug!(
            job_id = %superseded.id,
            batch_id = %job.batch_id,
            "Pending sync job superseded by newer phase change"
        );
    }

    if from_phase == job.to_phase {
        return Ok(None);
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sync_jobs (
            id, batch_id, external_batch_id, from_phase, to_phase, occurred_at,
            status, attempts, next_attempt_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(job.batch_id.to_string())
    .bind(&job.external_batch_id)
    .bind(from_phase.as_str())
    .bind(job.to_phase.as_str())
    .bind(time::to_db(job.occurred_at))
    .bind(SyncStatus::Pending.as_str())
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;

    load_job(conn, id).await.map(Some)
}

pub async fn load_job(conn: &mut SqliteConnection, job_id: Uuid) -> Result<SyncJob> {
    let row = sqlx::query(&format!("SELECT {} FROM sync_jobs WHERE id = ?", JOB_COLUMNS))
        .bind(job_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LifecycleError::not_found("sync job", job_id))?;

    job_from_row(&row)
}

/// Most recently enqueued job of a batch
pub async fn latest_for_batch(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<Option<SyncJob>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM sync_jobs WHERE batch_id = ? ORDER BY seq DESC LIMIT 1",
        JOB_COLUMNS
    ))
    .bind(batch_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

pub async fn list_for_batch(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<Vec<SyncJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM sync_jobs WHERE batch_id = ? ORDER BY seq",
        JOB_COLUMNS
    ))
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(job_from_row).collect()
}

pub async fn list_jobs(
    conn: &mut SqliteConnection,
    status: Option<SyncStatus>,
    limit: i64,
) -> Result<Vec<SyncJob>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {} FROM sync_jobs WHERE status = ? ORDER BY seq DESC LIMIT ?",
                JOB_COLUMNS
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM sync_jobs ORDER BY seq DESC LIMIT ?",
                JOB_COLUMNS
            ))
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?
        }
    };

    rows.iter().map(job_from_row).collect()
}

async fn jobs_with_status(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    status: SyncStatus,
) -> Result<Vec<SyncJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM sync_jobs WHERE batch_id = ? AND status = ? ORDER BY seq",
        JOB_COLUMNS
    ))
    .bind(batch_id.to_string())
    .bind(status.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Claim up to `limit` due jobs, at most one per batch
pub async fn claim_due(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<SyncJob>> {
    let superseded = supersede_overtaken(conn, now).await?;
    if superseded > 0 {
        tracing::info!(count = superseded, "Superseded sync jobs overtaken by later phase changes");
    }

    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM sync_jobs j
        WHERE j.status = 'pending'
          AND j.next_attempt_at <= ?
          AND NOT EXISTS (
              SELECT 1 FROM sync_jobs o
              WHERE o.batch_id = j.batch_id
                AND o.seq < j.seq
                AND o.status IN ('pending', 'in_flight')
          )
          AND NOT EXISTS (
              SELECT 1 FROM sync_jobs o
              WHERE o.batch_id = j.batch_id AND o.status = 'in_flight'
          )
        ORDER BY j.seq
        LIMIT ?
        "#,
        JOB_COLUMNS
    ))
    .bind(time::to_db(now))
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    let mut claimed = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut job = job_from_row(row)?;
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'in_flight', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(time::to_db(now))
        .bind(job.id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            job.status = SyncStatus::InFlight;
            job.updated_at = now;
            claimed.push(job);
        }
    }

    Ok(claimed)
}

pub async fn record_success(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    attempts: u32,
    confirmation_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sync_jobs
        SET status = 'synced', attempts = ?, confirmation_id = ?, last_error = NULL, updated_at = ?
        WHERE id = ? AND status = 'in_flight'
        "#,
    )
    .bind(attempts as i64)
    .bind(confirmation_id)
    .bind(time::to_db(now))
    .bind(job_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Store a failed attempt: back to `pending` at `next_attempt_at`, or `failed`
pub async fn record_failure(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    attempts: u32,
    status: SyncStatus,
    next_attempt_at: DateTime<Utc>,
    error: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sync_jobs
        SET status = ?, attempts = ?, next_attempt_at = ?, last_error = ?, updated_at = ?
        WHERE id = ? AND status = 'in_flight'
        "#,
    )
    .bind(status.as_str())
    .bind(attempts as i64)
    .bind(time::to_db(next_attempt_at))
    .bind(error)
    .bind(time::to_db(now))
    .bind(job_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Mark pending jobs superseded when a later job of their batch is in
/// flight or synced
pub async fn supersede_overtaken(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sync_jobs SET status = 'superseded', updated_at = ?
        WHERE status = 'pending'
          AND EXISTS (
              SELECT 1 FROM sync_jobs o
              WHERE o.batch_id = sync_jobs.batch_id
                AND o.seq > sync_jobs.seq
                AND o.status IN ('in_flight', 'synced')
          )
        "#,
    )
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Later jobs of the same batch that are pending, in flight or synced
pub async fn later_live_jobs(conn: &mut SqliteConnection, job: &SyncJob) -> Result<Vec<SyncJob>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM sync_jobs
        WHERE batch_id = ? AND seq > ? AND status IN ('pending', 'in_flight', 'synced')
        ORDER BY seq
        "#,
        JOB_COLUMNS
    ))
    .bind(job.job.batch_id.to_string())
    .bind(job.seq)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Widen a pending job to report from `from_phase` and make it due now
pub async fn merge_from_phase(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    from_phase: RegulatoryPhase,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sync_jobs
        SET from_phase = ?, attempts = 0, next_attempt_at = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(from_phase.as_str())
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .bind(job_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Make a job immediately due with a fresh attempt budget
pub async fn reset_for_retry(conn: &mut SqliteConnection, job_id: Uuid, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sync_jobs
        SET status = 'pending', attempts = 0, next_attempt_at = ?, updated_at = ?
        WHERE id = ? AND status IN ('pending', 'failed')
        "#,
    )
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .bind(job_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    status: SyncStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE sync_jobs SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(time::to_db(now))
        .bind(job_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Return one job the worker could not settle to the queue
pub async fn requeue_job(conn: &mut SqliteConnection, job_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE sync_jobs SET status = 'pending', next_attempt_at = ?, updated_at = ? WHERE id = ? AND status = 'in_flight'",
    )
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .bind(job_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Return jobs left in flight by a stopped worker to the queue
pub async fn requeue_in_flight(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE sync_jobs SET status = 'pending', next_attempt_at = ?, updated_at = ? WHERE status = 'in_flight'",
    )
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

fn job_from_row(row: &SqliteRow) -> Result<SyncJob> {
    let attempts: i64 = row.get("attempts");

    Ok(SyncJob {
        id: parse_uuid("id", row.get("id"))?,
        seq: row.get("seq"),
        job: PhaseChangeJob {
            batch_id: parse_uuid("batch_id", row.get("batch_id"))?,
            external_batch_id: row.get("external_batch_id"),
            from_phase: parse_column("from_phase", row.get("from_phase"))?,
            to_phase: parse_column("to_phase", row.get("to_phase"))?,
            occurred_at: time::from_db("occurred_at", row.get("occurred_at"))?,
        },
        status: parse_column("status", row.get("status"))?,
        attempts: attempts.max(0) as u32,
        next_attempt_at: time::from_db("next_attempt_at", row.get("next_attempt_at"))?,
        last_error: row.get("last_error"),
        confirmation_id: row.get("confirmation_id"),
        updated_at: time::from_db("updated_at", row.get("updated_at"))?,
    })
}
