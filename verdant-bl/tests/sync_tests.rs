//! Regulatory sync: outbox, retry/backoff, ordering and re-trigger

mod helpers;

use async_trait::async_trait;
use helpers::*;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use verdant_bl::db;
use verdant_bl::models::{PhaseChangeJob, RegulatoryPhase, Stage, SyncJob, SyncStatus};
use verdant_bl::sync::{RegulatoryClient, SyncCoordinator, SyncReceipt};
use verdant_bl::LifecycleError;
use verdant_common::events::LifecycleEvent;
use verdant_common::time;

async fn job_by_id(ctx: &TestContext, batch_id: Uuid, job_id: Uuid) -> SyncJob {
    ctx.service
        .batch_sync_jobs(batch_id)
        .await
        .unwrap()
        .into_iter()
        .find(|j| j.id == job_id)
        .unwrap()
}

/// Vegetative batch whose immature -> vegetative job failed for good,
/// followed by a pending vegetative -> flowering job
async fn failed_then_flowering(
    ctx: &TestContext,
    batch_number: &str,
    client: Arc<MockRegulatoryClient>,
) -> (Uuid, SyncCoordinator, SyncJob, SyncJob) {
    let batch_id = batch_in_stage(ctx, batch_number, Stage::Vegetative, 5).await;

    let mut settings = sync_settings();
    settings.max_attempts = 1;
    let worker = coordinator(ctx, client, settings);
    worker.process_due().await.unwrap();
    let failed = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(failed.status, SyncStatus::Failed);

    ctx.service
        .transition(batch_id, Stage::Flowering, ACTOR, None)
        .await
        .unwrap();
    let later = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_ne!(later.id, failed.id);
    assert_eq!(later.status, SyncStatus::Pending);

    (batch_id, worker, failed, later)
}

#[tokio::test]
async fn test_phase_change_is_reported() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-1", Stage::Vegetative, 5).await;

    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Pending);
    assert_eq!(job.job.from_phase, RegulatoryPhase::Immature);
    assert_eq!(job.job.to_phase, RegulatoryPhase::Vegetative);
    assert_eq!(job.job.external_batch_id, "EXT-SY-1");

    let client = MockRegulatoryClient::new();
    let worker = coordinator(&ctx, client.clone(), sync_settings());
    assert_eq!(worker.process_due().await.unwrap(), 1);

    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Synced);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.confirmation_id.as_deref(), Some("CONF-vegetative"));
    assert_eq!(client.calls().len(), 1);

    assert_eq!(worker.process_due().await.unwrap(), 0);
}

#[tokio::test]
async fn test_transition_without_phase_change_enqueues_nothing() {
    let ctx = setup().await;
    let batch = ctx
        .service
        .create_batch(cannabis_batch("SY-2", Stage::Germination, 5), ACTOR)
        .await
        .unwrap();

    let outcome = ctx
        .service
        .transition(batch.id, Stage::Seedling, ACTOR, None)
        .await
        .unwrap();
    assert!(!outcome.sync_enqueued);
    assert!(ctx.service.sync_status(batch.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pending_jobs_collapse_into_latest_change() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-3", Stage::Flowering, 5).await;

    let jobs = ctx.service.batch_sync_jobs(batch_id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].status, SyncStatus::Superseded);
    assert_eq!(jobs[1].status, SyncStatus::Pending);
    assert_eq!(jobs[1].job.from_phase, RegulatoryPhase::Immature);
    assert_eq!(jobs[1].job.to_phase, RegulatoryPhase::Flowering);

    let client = MockRegulatoryClient::new();
    coordinator(&ctx, client.clone(), sync_settings())
        .process_due()
        .await
        .unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].from_phase, RegulatoryPhase::Immature);
    assert_eq!(calls[0].to_phase, RegulatoryPhase::Flowering);
}

#[tokio::test]
async fn test_retries_until_failed() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-4", Stage::Vegetative, 5).await;

    let client = MockRegulatoryClient::scripted(vec![
        MockOutcome::Error("connection refused".to_string()),
        MockOutcome::Reject("unknown batch".to_string()),
        MockOutcome::Error("503 Service Unavailable".to_string()),
    ]);
    let worker = coordinator(&ctx, client.clone(), sync_settings());

    for attempt in 1..=3u32 {
        assert_eq!(worker.process_due().await.unwrap(), 1);
        let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
        assert_eq!(job.attempts, attempt);
        let expected = if attempt < 3 {
            SyncStatus::Pending
        } else {
            SyncStatus::Failed
        };
        assert_eq!(job.status, expected);
    }

    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert!(job.last_error.unwrap().contains("503"));
    assert_eq!(worker.process_due().await.unwrap(), 0);
    assert_eq!(client.calls().len(), 3);

    let failed = ctx
        .service
        .list_sync_jobs(Some(SyncStatus::Failed), 100)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, job.id);
}

#[tokio::test]
async fn test_rejection_counts_as_failed_attempt() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-5", Stage::Vegetative, 5).await;

    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Reject("bad phase".to_string())]);
    coordinator(&ctx, client, sync_settings())
        .process_due()
        .await
        .unwrap();

    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("bad phase"));
}

#[tokio::test]
async fn test_backoff_delays_next_attempt() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-6", Stage::Vegetative, 5).await;

    let mut settings = sync_settings();
    settings.base_backoff_ms = 60_000;
    settings.max_backoff_ms = 60_000;
    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Error("down".to_string())]);
    let worker = coordinator(&ctx, client.clone(), settings);

    assert_eq!(worker.process_due().await.unwrap(), 1);
    assert_eq!(worker.process_due().await.unwrap(), 0);

    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Pending);
    assert!(job.next_attempt_at > job.updated_at);

    // Operator re-trigger skips the backoff
    ctx.service.retrigger_sync(job.id, ACTOR).await.unwrap();
    assert_eq!(worker.process_due().await.unwrap(), 1);
    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_timeout_is_a_failed_attempt() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-7", Stage::Vegetative, 5).await;

    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Hang]);
    coordinator(&ctx, client, sync_settings())
        .process_due()
        .await
        .unwrap();

    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_retrigger_failed_job() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-8", Stage::Vegetative, 5).await;

    let mut settings = sync_settings();
    settings.max_attempts = 1;
    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Error("down".to_string())]);
    let worker = coordinator(&ctx, client.clone(), settings);
    worker.process_due().await.unwrap();

    let failed = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(failed.status, SyncStatus::Failed);

    let mut rx = ctx.event_bus.subscribe();
    let job = ctx.service.retrigger_sync(failed.id, ACTOR).await.unwrap();
    assert_eq!(job.status, SyncStatus::Pending);
    assert_eq!(job.attempts, 0);
    match rx.recv().await.unwrap() {
        LifecycleEvent::SyncStatusChanged { job_id, status, .. } => {
            assert_eq!(job_id, failed.id);
            assert_eq!(status, "pending");
        }
        other => panic!("unexpected event {:?}", other),
    }

    worker.process_due().await.unwrap();
    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Synced);

    let err = ctx.service.retrigger_sync(job.id, ACTOR).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
}

#[tokio::test]
async fn test_overtaken_failed_job_is_superseded_on_retrigger() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-9", Stage::Vegetative, 5).await;

    let mut settings = sync_settings();
    settings.max_attempts = 1;
    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Error("down".to_string())]);
    let worker = coordinator(&ctx, client.clone(), settings);
    worker.process_due().await.unwrap();
    let failed = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(failed.status, SyncStatus::Failed);

    // A failed job does not hold back later phase changes
    ctx.service
        .transition(batch_id, Stage::Flowering, ACTOR, None)
        .await
        .unwrap();
    assert_eq!(worker.process_due().await.unwrap(), 1);
    let latest = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(latest.status, SyncStatus::Synced);
    assert_eq!(latest.job.from_phase, RegulatoryPhase::Vegetative);
    assert_eq!(latest.job.to_phase, RegulatoryPhase::Flowering);

    let retriggered = ctx.service.retrigger_sync(failed.id, ACTOR).await.unwrap();
    assert_eq!(retriggered.status, SyncStatus::Superseded);
    assert_eq!(worker.process_due().await.unwrap(), 0);
}

#[tokio::test]
async fn test_batches_sync_independently() {
    let ctx = setup().await;
    let a = batch_in_stage(&ctx, "SY-10", Stage::Vegetative, 5).await;
    let b = batch_in_stage(&ctx, "SY-11", Stage::Vegetative, 5).await;

    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Error("down".to_string())]);
    let worker = coordinator(&ctx, client.clone(), sync_settings());
    assert_eq!(worker.process_due().await.unwrap(), 2);

    let statuses = [
        ctx.service.sync_status(a).await.unwrap().unwrap().status,
        ctx.service.sync_status(b).await.unwrap().unwrap().status,
    ];
    assert!(statuses.contains(&SyncStatus::Synced));
    assert!(statuses.contains(&SyncStatus::Pending));
}

#[tokio::test]
async fn test_produce_and_untracked_batches_never_sync() {
    let ctx = setup().await;

    let produce = ctx
        .service
        .create_batch(produce_batch("SY-12", Stage::Germination, 50), ACTOR)
        .await
        .unwrap();
    let outcome = ctx
        .service
        .transition(produce.id, Stage::Growing, ACTOR, None)
        .await
        .unwrap();
    assert!(!outcome.sync_enqueued);
    assert!(ctx.service.sync_status(produce.id).await.unwrap().is_none());

    let mut untracked = cannabis_batch("SY-13", Stage::Seedling, 5);
    untracked.external_batch_id = None;
    let untracked = ctx.service.create_batch(untracked, ACTOR).await.unwrap();
    let outcome = ctx
        .service
        .transition(untracked.id, Stage::Vegetative, ACTOR, None)
        .await
        .unwrap();
    assert!(!outcome.sync_enqueued);
    assert!(ctx.service.batch_sync_jobs(untracked.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_jurisdiction_without_external_sync() {
    let mut config = jurisdiction_config();
    config.requires_external_sync = false;
    let ctx = setup_with(config).await;

    let batch = ctx
        .service
        .create_batch(cannabis_batch("SY-14", Stage::Seedling, 5), ACTOR)
        .await
        .unwrap();
    let outcome = ctx
        .service
        .transition(batch.id, Stage::Vegetative, ACTOR, None)
        .await
        .unwrap();
    assert!(!outcome.sync_enqueued);
    assert!(ctx.service.sync_status(batch.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_worker_loop_delivers_after_enqueue() {
    let ctx = setup().await;
    let client = MockRegulatoryClient::new();
    let worker = coordinator(&ctx, client.clone(), sync_settings());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.run(cancel.clone()));

    let batch_id = batch_in_stage(&ctx, "SY-15", Stage::Vegetative, 5).await;

    let mut synced = false;
    for _ in 0..200 {
        let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
        if job.status == SyncStatus::Synced {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    handle.await.unwrap();
    assert!(synced);
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn test_retrigger_while_later_job_in_flight_is_superseded() {
    let ctx = setup().await;
    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Error("down".to_string())]);
    let (batch_id, worker, failed, later) = failed_then_flowering(&ctx, "SY-16", client.clone()).await;

    let mut conn = ctx.pool.acquire().await.unwrap();
    let claimed = db::sync_jobs::claim_due(&mut conn, time::now(), 10).await.unwrap();
    drop(conn);
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, later.id);

    let retriggered = ctx.service.retrigger_sync(failed.id, ACTOR).await.unwrap();
    assert_eq!(retriggered.status, SyncStatus::Superseded);

    let mut conn = ctx.pool.acquire().await.unwrap();
    db::sync_jobs::record_success(&mut conn, later.id, 1, Some("C-2"), time::now())
        .await
        .unwrap();
    drop(conn);

    assert_eq!(worker.process_due().await.unwrap(), 0);
    assert_eq!(client.calls().len(), 1);
    assert_eq!(
        job_by_id(&ctx, batch_id, failed.id).await.status,
        SyncStatus::Superseded
    );
}

#[tokio::test]
async fn test_stale_pending_job_behind_synced_job_is_never_delivered() {
    let ctx = setup().await;
    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Error("down".to_string())]);
    let (batch_id, worker, failed, later) = failed_then_flowering(&ctx, "SY-17", client.clone()).await;

    assert_eq!(worker.process_due().await.unwrap(), 1);
    assert_eq!(job_by_id(&ctx, batch_id, later.id).await.status, SyncStatus::Synced);

    sqlx::query("UPDATE sync_jobs SET status = 'pending' WHERE id = ?")
        .bind(failed.id.to_string())
        .execute(&ctx.pool)
        .await
        .unwrap();

    assert_eq!(worker.process_due().await.unwrap(), 0);
    assert_eq!(
        job_by_id(&ctx, batch_id, failed.id).await.status,
        SyncStatus::Superseded
    );

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].from_phase, RegulatoryPhase::Vegetative);
    assert_eq!(calls[1].to_phase, RegulatoryPhase::Flowering);
}

#[tokio::test]
async fn test_retrigger_merges_into_pending_later_job() {
    let ctx = setup().await;
    let client = MockRegulatoryClient::scripted(vec![MockOutcome::Error("down".to_string())]);
    let (batch_id, worker, failed, later) = failed_then_flowering(&ctx, "SY-18", client.clone()).await;

    let retriggered = ctx.service.retrigger_sync(failed.id, ACTOR).await.unwrap();
    assert_eq!(retriggered.status, SyncStatus::Superseded);

    let merged = job_by_id(&ctx, batch_id, later.id).await;
    assert_eq!(merged.status, SyncStatus::Pending);
    assert_eq!(merged.job.from_phase, RegulatoryPhase::Immature);
    assert_eq!(merged.job.to_phase, RegulatoryPhase::Flowering);

    assert_eq!(worker.process_due().await.unwrap(), 1);
    assert_eq!(worker.process_due().await.unwrap(), 0);

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].from_phase, RegulatoryPhase::Immature);
    assert_eq!(calls[1].to_phase, RegulatoryPhase::Flowering);
    assert_eq!(job_by_id(&ctx, batch_id, later.id).await.status, SyncStatus::Synced);
}

/// Confirms every call; the first call also makes outcome writes fail
struct OutcomeStoreBreaker {
    pool: SqlitePool,
    armed: AtomicBool,
    calls: std::sync::Mutex<usize>,
}

#[async_trait]
impl RegulatoryClient for OutcomeStoreBreaker {
    async fn report_phase_change(&self, job: &PhaseChangeJob) -> verdant_bl::Result<SyncReceipt> {
        *self.calls.lock().unwrap() += 1;
        if self.armed.swap(false, Ordering::SeqCst) {
            sqlx::query(
                r#"
                CREATE TRIGGER block_sync_outcome BEFORE UPDATE OF status ON sync_jobs
                WHEN OLD.status = 'in_flight'
                BEGIN SELECT RAISE(ABORT, 'outcome store unavailable'); END
                "#,
            )
            .execute(&self.pool)
            .await?;
        }
        Ok(SyncReceipt {
            success: true,
            confirmation_id: Some(format!("CONF-{}", job.to_phase)),
            message: None,
        })
    }
}

#[tokio::test]
async fn test_unrecorded_outcome_is_requeued_on_next_pass() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "SY-19", Stage::Vegetative, 5).await;

    let client = Arc::new(OutcomeStoreBreaker {
        pool: ctx.pool.clone(),
        armed: AtomicBool::new(true),
        calls: std::sync::Mutex::new(0),
    });
    let worker = SyncCoordinator::new(
        ctx.pool.clone(),
        client.clone(),
        sync_settings(),
        ctx.service.sync_notify(),
        ctx.event_bus.clone(),
    );

    assert_eq!(worker.process_due().await.unwrap(), 1);
    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::InFlight);

    sqlx::query("DROP TRIGGER block_sync_outcome")
        .execute(&ctx.pool)
        .await
        .unwrap();

    assert_eq!(worker.process_due().await.unwrap(), 1);
    let job = ctx.service.sync_status(batch_id).await.unwrap().unwrap();
    assert_eq!(job.status, SyncStatus::Synced);
    assert_eq!(*client.calls.lock().unwrap(), 2);
}
