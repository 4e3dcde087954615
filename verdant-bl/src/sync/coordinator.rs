//! Sync worker: claims due jobs, calls the regulator, records outcomes
//!
//! Each batch has at most one job in flight, and jobs of one batch are
//! claimed in enqueue order. Jobs of different batches run concurrently up to
//! `SyncSettings::concurrency`. A failed attempt is rescheduled with
//! exponential backoff until `max_attempts` is reached, after which the job
//! is parked as `failed` for an operator re-trigger. A job whose outcome
//! could not be recorded is returned to the queue on the next pass, so the
//! regulator may see it again.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use verdant_common::config::SyncSettings;
use verdant_common::events::{EventBus, LifecycleEvent};
use verdant_common::time;

use super::client::RegulatoryClient;
use crate::db;
use crate::error::Result;
use crate::models::{SyncJob, SyncStatus};
use crate::utils::db_retry::retry_on_conflict;

/// Delay before the next attempt after `attempts` failures
///
/// `base * 2^(attempts - 1)`, capped at `max_backoff_ms`.
pub fn backoff_delay(settings: &SyncSettings, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(32);
    let delay_ms = settings
        .base_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(settings.max_backoff_ms);
    Duration::from_millis(delay_ms)
}

pub struct SyncCoordinator {
    pool: SqlitePool,
    client: Arc<dyn RegulatoryClient>,
    settings: SyncSettings,
    notify: Arc<Notify>,
    event_bus: EventBus,
    /// Claimed jobs left in flight because storing their outcome failed
    unsettled: Mutex<Vec<Uuid>>,
}

/// Result of one regulator call
enum AttemptResult {
    Confirmed(Option<String>),
    Failed(String),
}

impl SyncCoordinator {
    pub fn new(
        pool: SqlitePool,
        client: Arc<dyn RegulatoryClient>,
        settings: SyncSettings,
        notify: Arc<Notify>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            pool,
            client,
            settings,
            notify,
            event_bus,
            unsettled: Mutex::new(Vec::new()),
        }
    }

    /// Worker loop; returns when `cancel` fires
    ///
    /// Wakes on enqueue notifications and on the poll interval (backoff
    /// expiry is only noticed by polling).
    pub async fn run(self, cancel: CancellationToken) {
        match self.requeue_in_flight().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Re-queued sync jobs left in flight"),
            Err(e) => error!(error = %e, "Failed to re-queue in-flight sync jobs"),
        }

        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms.max(10));
        info!(
            concurrency = self.settings.concurrency,
            max_attempts = self.settings.max_attempts,
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Sync coordinator started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.process_due().await {
                // Completing a job may make the next job of that batch due
                Ok(processed) if processed > 0 => continue,
                Ok(_) => {}
                Err(e) => error!(error = %e, "Sync pass failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notify.notified() => {
                    debug!("Sync coordinator woken by enqueue");
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("Sync coordinator stopped");
    }

    /// Claim and attempt every job that is currently due
    ///
    /// Returns the number of jobs attempted.
    pub async fn process_due(&self) -> Result<usize> {
        self.requeue_unsettled().await?;

        let limit = self.settings.concurrency.max(1) as i64;
        let claimed = {
            let mut tx = self.pool.begin().await?;
            let claimed = db::sync_jobs::claim_due(&mut tx, time::now(), limit).await?;
            tx.commit().await?;
            claimed
        };

        let count = claimed.len();
        if count == 0 {
            return Ok(0);
        }
        debug!(count, "Claimed due sync jobs");

        stream::iter(claimed)
            .for_each_concurrent(self.settings.concurrency.max(1), |job| self.attempt(job))
            .await;

        Ok(count)
    }

    async fn attempt(&self, job: SyncJob) {
        let attempts = job.attempts + 1;
        let result = self.call_regulator(&job).await;
        let now = time::now();

        let status = match result {
            AttemptResult::Confirmed(confirmation_id) => {
                info!(
                    job_id = %job.id,
                    batch_id = %job.job.batch_id,
                    to_phase = %job.job.to_phase,
                    attempts,
                    confirmation_id = confirmation_id.as_deref().unwrap_or(""),
                    "Phase change reported to regulator"
                );
                retry_on_conflict("record sync success", || {
                    self.store_success(&job, attempts, confirmation_id.as_deref(), now)
                })
                .await
                .map(|_| SyncStatus::Synced)
            }
            AttemptResult::Failed(reason) => {
                let (status, next_attempt_at) = self.schedule_after_failure(attempts, now);
                if status == SyncStatus::Failed {
                    error!(
                        job_id = %job.id,
                        batch_id = %job.job.batch_id,
                        attempts,
                        error = %reason,
                        "Sync job failed permanently; operator re-trigger required"
                    );
                } else {
                    warn!(
                        job_id = %job.id,
                        batch_id = %job.job.batch_id,
                        attempts,
                        next_attempt_at = %next_attempt_at,
                        error = %reason,
                        "Sync attempt failed, will retry"
                    );
                }
                retry_on_conflict("record sync failure", || {
                    self.store_failure(&job, attempts, status, next_attempt_at, &reason, now)
                })
                .await
                .map(|_| status)
            }
        };

        match status {
            Ok(status) => self.event_bus.emit_lossy(LifecycleEvent::SyncStatusChanged {
                job_id: job.id,
                batch_id: job.job.batch_id,
                status: status.to_string(),
                attempts,
                timestamp: now,
            }),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record sync outcome");
                self.unsettled.lock().await.push(job.id);
            }
        }
    }

    async fn call_regulator(&self, job: &SyncJob) -> AttemptResult {
        let timeout = Duration::from_millis(self.settings.request_timeout_ms);
        match tokio::time::timeout(timeout, self.client.report_phase_change(&job.job)).await {
            Ok(Ok(receipt)) if receipt.success => AttemptResult::Confirmed(receipt.confirmation_id),
            Ok(Ok(receipt)) => AttemptResult::Failed(format!(
                "regulator rejected phase change: {}",
                receipt.message.unwrap_or_else(|| "no message".to_string())
            )),
            Ok(Err(e)) => AttemptResult::Failed(e.to_string()),
            Err(_) => AttemptResult::Failed(format!(
                "regulator call timed out after {} ms",
                self.settings.request_timeout_ms
            )),
        }
    }

    fn schedule_after_failure(&self, attempts: u32, now: DateTime<Utc>) -> (SyncStatus, DateTime<Utc>) {
        if attempts >= self.settings.max_attempts {
            return (SyncStatus::Failed, now);
        }
        let delay = backoff_delay(&self.settings, attempts);
        let next = chrono::Duration::from_std(delay)
            .map(|d| now + d)
            .unwrap_or(now);
        (SyncStatus::Pending, next)
    }

    async fn store_success(
        &self,
        job: &SyncJob,
        attempts: u32,
        confirmation_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        db::sync_jobs::record_success(&mut conn, job.id, attempts, confirmation_id, now).await
    }

    async fn store_failure(
        &self,
        job: &SyncJob,
        attempts: u32,
        status: SyncStatus,
        next_attempt_at: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        db::sync_jobs::record_failure(&mut conn, job.id, attempts, status, next_attempt_at, reason, now)
            .await
    }

    async fn requeue_unsettled(&self) -> Result<()> {
        let mut unsettled = self.unsettled.lock().await;
        if unsettled.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await?;
        let now = time::now();
        while let Some(&job_id) = unsettled.last() {
            if db::sync_jobs::requeue_job(&mut conn, job_id, now).await? {
                warn!(job_id = %job_id, "Re-queued sync job whose outcome was not recorded");
            }
            unsettled.pop();
        }
        Ok(())
    }

    async fn requeue_in_flight(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        db::sync_jobs::requeue_in_flight(&mut conn, time::now()).await
    }
}
