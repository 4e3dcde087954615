//! Plant tag reconciliation

mod helpers;

use helpers::*;
use verdant_bl::models::{EventType, Stage};

#[tokio::test]
async fn test_assign_valid_tags() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "T-1", Stage::Vegetative, 4).await;

    let result = ctx
        .service
        .assign_tags(batch_id, &tags(0..3), ACTOR)
        .await
        .unwrap();
    assert_eq!(result.assigned, tags(0..3));
    assert!(result.invalid.is_empty());
    assert!(result.skipped_duplicates.is_empty());
    assert!(result.mismatch_warning.is_none());

    let completion = ctx.service.tag_completion(batch_id).await.unwrap();
    assert_eq!(completion.tagged, 3);
    assert_eq!(completion.total, 4);
    assert_eq!(completion.percentage, 75.0);

    let events = ctx.service.events(batch_id).await.unwrap();
    assert_eq!(events.last().unwrap().event_type, EventType::TagsAssigned);
}

#[tokio::test]
async fn test_mixed_submission_is_judged_per_tag() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "T-2", Stage::Vegetative, 10).await;
    ctx.service
        .assign_tags(batch_id, &[tag(1)], ACTOR)
        .await
        .unwrap();

    let submission = vec![
        tag(1),                  // already on the batch
        "short".to_string(),     // bad format
        tag(2),
        format!("  {}  ", tag(3)), // trimmed
        tag(2),                  // repeated in this call
    ];
    let result = ctx
        .service
        .assign_tags(batch_id, &submission, ACTOR)
        .await
        .unwrap();

    assert_eq!(result.assigned, vec![tag(2), tag(3)]);
    assert_eq!(result.skipped_duplicates, vec![tag(1), tag(2)]);
    assert_eq!(result.invalid.len(), 1);
    assert_eq!(result.invalid[0].tag, "short");

    let batch = ctx.service.get_batch(batch_id).await.unwrap();
    assert_eq!(batch.tags.len(), 3);
}

#[tokio::test]
async fn test_tag_held_by_other_batch_is_invalid() {
    let ctx = setup().await;
    let first = batch_in_stage(&ctx, "T-3", Stage::Vegetative, 5).await;
    let second = batch_in_stage(&ctx, "T-4", Stage::Vegetative, 5).await;

    ctx.service.assign_tags(first, &[tag(7)], ACTOR).await.unwrap();
    let result = ctx
        .service
        .assign_tags(second, &[tag(7), tag(8)], ACTOR)
        .await
        .unwrap();

    assert_eq!(result.assigned, vec![tag(8)]);
    assert_eq!(result.invalid.len(), 1);
    assert!(result.invalid[0].reason.contains(&first.to_string()));
}

#[tokio::test]
async fn test_over_assignment_warns_without_truncating() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "T-5", Stage::Vegetative, 2).await;

    let result = ctx
        .service
        .assign_tags(batch_id, &tags(0..3), ACTOR)
        .await
        .unwrap();
    assert_eq!(result.assigned.len(), 3);
    assert!(result.mismatch_warning.is_some());

    let completion = ctx.service.tag_completion(batch_id).await.unwrap();
    assert!(completion.over_assigned);
    assert_eq!(completion.tagged, 3);
}

#[tokio::test]
async fn test_nothing_assigned_leaves_batch_version() {
    let ctx = setup().await;
    let batch_id = batch_in_stage(&ctx, "T-6", Stage::Vegetative, 2).await;
    let before = ctx.service.get_batch(batch_id).await.unwrap();

    let result = ctx
        .service
        .assign_tags(batch_id, &["bad".to_string()], ACTOR)
        .await
        .unwrap();
    assert!(result.assigned.is_empty());

    let after = ctx.service.get_batch(batch_id).await.unwrap();
    assert_eq!(after.version, before.version);
}
