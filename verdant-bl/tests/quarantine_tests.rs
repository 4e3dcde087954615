//! Quarantine gate

mod helpers;

use helpers::*;
use std::sync::Arc;
use verdant_bl::models::{BatchStatus, EventType, HarvestInput, Stage};
use verdant_bl::LifecycleError;

#[tokio::test]
async fn test_quarantine_blocks_transitions_until_release() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "Q-1", Stage::Vegetative, 10).await;

    let batch = ctx
        .service
        .quarantine(batch_id, "powdery mildew", ACTOR)
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Quarantined);
    assert_eq!(batch.quarantine_reason.as_deref(), Some("powdery mildew"));

    let err = ctx
        .service
        .transition(batch_id, Stage::Flowering, ACTOR, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::QuarantineBlocked(_)), "{:?}", err);

    let released = ctx
        .service
        .release(batch_id, "qa@test", Some("lab clear"))
        .await
        .unwrap();
    assert_eq!(released.status, BatchStatus::Active);
    assert_eq!(released.stage, Stage::Vegetative);

    ctx.service
        .transition(batch_id, Stage::Flowering, ACTOR, None)
        .await
        .unwrap();

    let types: Vec<EventType> = ctx
        .service
        .events(batch_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.event_type)
        .collect();
    let q = types.iter().position(|t| *t == EventType::Quarantined).unwrap();
    let r = types.iter().position(|t| *t == EventType::Released).unwrap();
    assert!(q < r);
}

#[tokio::test]
async fn test_quarantine_twice_and_release_when_active_fail() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "Q-2", Stage::Seedling, 10).await;

    let err = ctx.service.release(batch_id, ACTOR, None).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotQuarantined(_)));

    ctx.service.quarantine(batch_id, "pests", ACTOR).await.unwrap();
    let err = ctx
        .service
        .quarantine(batch_id, "pests again", ACTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyQuarantined(_)));
}

#[tokio::test]
async fn test_quarantine_requires_reason() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "Q-3", Stage::Seedling, 10).await;

    let err = ctx.service.quarantine(batch_id, "   ", ACTOR).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
}

#[tokio::test]
async fn test_quarantined_batch_cannot_record_harvest() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "Q-4", Stage::Harvest, 10).await;
    ctx.service.quarantine(batch_id, "contamination", ACTOR).await.unwrap();

    let err = ctx
        .service
        .record_harvest(
            batch_id,
            HarvestInput {
                wet_weight: 1000.0,
                dry_weight: None,
                waste_weight: None,
                notes: None,
            },
            None,
            ACTOR,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::QuarantineBlocked(_)));
}

#[tokio::test]
async fn test_terminal_batch_cannot_be_quarantined() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "Q-5", Stage::Curing, 10).await;
    ctx.service
        .transition(batch_id, Stage::Completed, ACTOR, None)
        .await
        .unwrap();

    let err = ctx.service.quarantine(batch_id, "late find", ACTOR).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Terminal { .. }));
}

#[tokio::test]
async fn test_transition_racing_quarantine_revalidates() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Arc::new(setup_file_backed(&dir).await);

    for i in 0..6 {
        let batch_id = batch_in_stage(&ctx, &format!("Q-R{}", i), Stage::Vegetative, 10).await;
        let before = ctx.service.get_batch(batch_id).await.unwrap();
        let history_before = ctx.service.stage_history(batch_id).await.unwrap().len();

        let transition = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.service
                    .transition(batch_id, Stage::Flowering, ACTOR, None)
                    .await
            })
        };
        let quarantine = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.service
                    .quarantine(batch_id, "pest inspection", "inspector@test")
                    .await
            })
        };
        let transitioned = transition.await.unwrap();
        quarantine.await.unwrap().unwrap();

        let batch = ctx.service.get_batch(batch_id).await.unwrap();
        let history = ctx.service.stage_history(batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Quarantined);

        match transitioned {
            Ok(_) => {
                assert_eq!(batch.stage, Stage::Flowering);
                assert_eq!(batch.version, before.version + 2);
                assert_eq!(history.len(), history_before + 1);
            }
            Err(LifecycleError::QuarantineBlocked(id)) => {
                assert_eq!(id, batch_id);
                assert_eq!(batch.stage, Stage::Vegetative);
                assert_eq!(batch.version, before.version + 1);
                assert_eq!(history.len(), history_before);
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }

        let open: Vec<_> = history.iter().filter(|h| h.ended_at.is_none()).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].stage, batch.stage);
    }
}
