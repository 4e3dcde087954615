//! Destruction / waste workflow

use tracing::{info, warn};
use uuid::Uuid;
use verdant_common::events::LifecycleEvent;
use verdant_common::time;

use super::{require_text, LifecycleService};
use crate::db;
use crate::error::{LifecycleError, Result};
use crate::models::{
    Batch, BatchStatus, DestroyOptions, DestroyOutcome, EventType, Stage, WasteLog,
};
use crate::utils::retry_on_conflict;

impl LifecycleService {
    /// Destroy a batch (terminal)
    ///
    /// When the jurisdiction requires a waste manifest and plants remain,
    /// the caller must acknowledge it, either by asking for a waste log or
    /// with a reason that mentions the manifest.
    pub async fn destroy(
        &self,
        batch_id: Uuid,
        reason: &str,
        actor: &str,
        options: DestroyOptions,
    ) -> Result<DestroyOutcome> {
        let reason = require_text("destruction reason", reason)?;

        let outcome = retry_on_conflict("destroy", || async {
            let mut tx = self.pool.begin().await?;
            let mut batch = db::batches::load_batch(&mut tx, batch_id).await?;

            batch.ensure_mutable()?;
            if batch.status == BatchStatus::Quarantined && !options.override_quarantine {
                return Err(LifecycleError::QuarantineOverrideRequired(batch_id));
            }
            self.check_manifest_acknowledged(&batch, &reason, &options)?;

            let now = time::now();
            let released_assignments = db::pods::end_batch_assignments(&mut tx, batch_id, now).await?;

            let deactivated_activation = match db::recipes::active_activation_for_batch(&mut tx, batch_id).await? {
                Some(activation) => {
                    db::recipes::deactivate(&mut tx, activation.id, now, actor, Some("batch destroyed"))
                        .await?;
                    Some(activation.id)
                }
                None => None,
            };

            db::history::close_open_stage(&mut tx, batch_id, now).await?;
            db::history::open_stage(&mut tx, batch_id, Stage::Destroyed, now).await?;

            let was_quarantined = batch.status == BatchStatus::Quarantined;
            batch.stage = Stage::Destroyed;
            batch.status = BatchStatus::Destroyed;
            batch.active_activation_id = None;
            db::batches::save_batch(&mut tx, &mut batch).await?;

            let notes = if was_quarantined {
                format!("{} (quarantine overridden)", reason)
            } else {
                reason.clone()
            };
            db::history::append_event(&mut tx, batch_id, EventType::Destroyed, actor, Some(&notes), now)
                .await?;

            let waste_log = if options.create_waste_log {
                let log = WasteLog {
                    id: Uuid::new_v4(),
                    batch_id,
                    plant_count: batch.plant_count,
                    reason: reason.clone(),
                    logged_by: actor.to_string(),
                    timestamp: now,
                };
                db::waste::insert_waste_log(&mut tx, &log).await?;
                Some(log)
            } else {
                None
            };

            tx.commit().await?;
            Ok(DestroyOutcome {
                batch,
                released_assignments,
                deactivated_activation,
                waste_log,
            })
        })
        .await?;

        warn!(
            batch_id = %batch_id,
            actor,
            reason = %reason,
            released_assignments = outcome.released_assignments,
            waste_log = outcome.waste_log.is_some(),
            "Batch destroyed"
        );
        if let Some(activation_id) = outcome.deactivated_activation {
            info!(batch_id = %batch_id, activation_id = %activation_id, "Recipe deactivated by destruction");
            self.emit(LifecycleEvent::RecipeDeactivated {
                batch_id,
                activation_id,
                timestamp: outcome.batch.updated_at,
            });
        }
        self.emit(LifecycleEvent::BatchDestroyed {
            batch_id,
            reason,
            timestamp: outcome.batch.updated_at,
        });

        Ok(outcome)
    }

    fn check_manifest_acknowledged(
        &self,
        batch: &Batch,
        reason: &str,
        options: &DestroyOptions,
    ) -> Result<()> {
        if !self.jurisdiction.manifest_required_on_destroy || batch.plant_count == 0 {
            return Ok(());
        }
        if options.create_waste_log || reason.to_lowercase().contains("manifest") {
            return Ok(());
        }
        Err(LifecycleError::ManifestAcknowledgementRequired {
            batch_id: batch.id,
            plant_count: batch.plant_count,
        })
    }

    pub async fn waste_logs(&self, batch_id: Uuid) -> Result<Vec<WasteLog>> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;
        db::waste::list_waste_logs(&mut conn, batch_id).await
    }
}
