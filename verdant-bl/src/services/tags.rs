//! Plant tag reconciler

use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;
use verdant_common::events::LifecycleEvent;
use verdant_common::time;

use super::LifecycleService;
use crate::db;
use crate::error::Result;
use crate::models::{EventType, InvalidTag, TagAssignmentResult, TagCompletion};
use crate::utils::retry_on_conflict;

impl LifecycleService {
    /// Append regulator-issued tags to a batch
    ///
    /// Each candidate is judged on its own: format violations and tags held
    /// by another batch land in `invalid`, tags this batch already carries
    /// (or repeated within the call) in `skipped_duplicates`. Carrying more
    /// tags than plants is reported, never truncated.
    pub async fn assign_tags(
        &self,
        batch_id: Uuid,
        candidates: &[String],
        actor: &str,
    ) -> Result<TagAssignmentResult> {
        let (result, tagged_total, plant_count) = retry_on_conflict("assign_tags", || async {
            let mut tx = self.pool.begin().await?;
            let mut batch = db::batches::load_batch(&mut tx, batch_id).await?;
            batch.ensure_mutable()?;

            let now = time::now();
            let mut result = TagAssignmentResult::default();
            let mut seen = HashSet::new();

            for candidate in candidates {
                let tag = candidate.trim();

                if let Err(reason) = self.jurisdiction.check_tag(tag) {
                    result.invalid.push(InvalidTag {
                        tag: tag.to_string(),
                        reason,
                    });
                    continue;
                }

                if batch.tags.contains(tag) || !seen.insert(tag) {
                    if !result.skipped_duplicates.iter().any(|t| t == tag) {
                        result.skipped_duplicates.push(tag.to_string());
                    }
                    continue;
                }

                if let Some(owner) = db::tags::tag_owner(&mut tx, tag).await? {
                    result.invalid.push(InvalidTag {
                        tag: tag.to_string(),
                        reason: format!("already assigned to batch {}", owner),
                    });
                    continue;
                }

                db::tags::insert_tag(&mut tx, tag, batch_id, now).await?;
                result.assigned.push(tag.to_string());
            }

            if !result.assigned.is_empty() {
                batch.tags.extend(result.assigned.iter().cloned());
                db::batches::save_batch(&mut tx, &mut batch).await?;
                db::history::append_event(
                    &mut tx,
                    batch_id,
                    EventType::TagsAssigned,
                    actor,
                    Some(&format!(
                        "{} assigned, {} duplicate, {} invalid",
                        result.assigned.len(),
                        result.skipped_duplicates.len(),
                        result.invalid.len()
                    )),
                    now,
                )
                .await?;
            }

            let completion = TagCompletion::compute(batch.tagged_count(), batch.plant_count);
            result.mismatch_warning = completion.mismatch_warning();

            tx.commit().await?;
            Ok((result, batch.tagged_count(), batch.plant_count))
        })
        .await?;

        info!(
            batch_id = %batch_id,
            assigned = result.assigned.len(),
            skipped_duplicates = result.skipped_duplicates.len(),
            invalid = result.invalid.len(),
            tagged_total,
            plant_count,
            "Plant tags reconciled"
        );
        if let Some(warning) = &result.mismatch_warning {
            warn!(batch_id = %batch_id, "{}", warning);
        }

        if !result.assigned.is_empty() {
            self.emit(LifecycleEvent::TagsAssigned {
                batch_id,
                assigned: result.assigned.len(),
                tagged_total,
                plant_count,
                timestamp: time::now(),
            });
        }

        Ok(result)
    }

    /// Tagging progress against plant count
    pub async fn tag_completion(&self, batch_id: Uuid) -> Result<TagCompletion> {
        let batch = self.get_batch(batch_id).await?;
        Ok(TagCompletion::compute(batch.tagged_count(), batch.plant_count))
    }
}
