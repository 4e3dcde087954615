//! Sync status read models and operator re-trigger

use tracing::info;
use uuid::Uuid;
use verdant_common::events::LifecycleEvent;
use verdant_common::time;

use super::LifecycleService;
use crate::db;
use crate::error::{LifecycleError, Result};
use crate::models::{SyncJob, SyncStatus};

impl LifecycleService {
    /// Latest phase-change job of a batch, `None` if nothing was ever queued
    pub async fn sync_status(&self, batch_id: Uuid) -> Result<Option<SyncJob>> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;
        db::sync_jobs::latest_for_batch(&mut conn, batch_id).await
    }

    pub async fn batch_sync_jobs(&self, batch_id: Uuid) -> Result<Vec<SyncJob>> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;
        db::sync_jobs::list_for_batch(&mut conn, batch_id).await
    }

    /// Newest first
    pub async fn list_sync_jobs(&self, status: Option<SyncStatus>, limit: i64) -> Result<Vec<SyncJob>> {
        let mut conn = self.pool.acquire().await?;
        db::sync_jobs::list_jobs(&mut conn, status, limit.clamp(1, 1000)).await
    }

    /// Operator re-trigger
    ///
    /// A failed job, or a pending one waiting out its backoff, becomes due
    /// now with a fresh attempt budget, unless a later phase change of the
    /// same batch exists:
    /// - a later job in flight or synced overtook it, so it is superseded;
    /// - a later pending job absorbs its `from_phase` and becomes due now,
    ///   and the re-triggered job is superseded.
    pub async fn retrigger_sync(&self, job_id: Uuid, actor: &str) -> Result<SyncJob> {
        let mut tx = self.pool.begin().await?;
        let job = db::sync_jobs::load_job(&mut tx, job_id).await?;

        match job.status {
            SyncStatus::Failed | SyncStatus::Pending => {}
            other => {
                return Err(LifecycleError::Validation(format!(
                    "sync job {} is {} and cannot be re-triggered",
                    job_id, other
                )))
            }
        }

        let now = time::now();
        let later = db::sync_jobs::later_live_jobs(&mut tx, &job).await?;
        let overtaken = later
            .iter()
            .any(|l| matches!(l.status, SyncStatus::InFlight | SyncStatus::Synced));
        let mut merged_into = None;

        if overtaken {
            db::sync_jobs::set_status(&mut tx, job_id, SyncStatus::Superseded, now).await?;
        } else if let Some(next) = later.first() {
            if next.job.to_phase == job.job.from_phase {
                db::sync_jobs::set_status(&mut tx, next.id, SyncStatus::Superseded, now).await?;
            } else {
                db::sync_jobs::merge_from_phase(&mut tx, next.id, job.job.from_phase, now).await?;
                merged_into = Some(next.id);
            }
            db::sync_jobs::set_status(&mut tx, job_id, SyncStatus::Superseded, now).await?;
        } else {
            db::sync_jobs::reset_for_retry(&mut tx, job_id, now).await?;
        }
        let job = db::sync_jobs::load_job(&mut tx, job_id).await?;
        tx.commit().await?;

        info!(
            job_id = %job_id,
            batch_id = %job.job.batch_id,
            actor,
            status = %job.status,
            merged_into = ?merged_into,
            "Sync job re-triggered"
        );

        if job.status == SyncStatus::Pending || merged_into.is_some() {
            self.sync_notify.notify_one();
        }
        self.emit(LifecycleEvent::SyncStatusChanged {
            job_id,
            batch_id: job.job.batch_id,
            status: job.status.to_string(),
            attempts: job.attempts,
            timestamp: now,
        });

        Ok(job)
    }
}
