//! Quarantine gate

use tracing::info;
use uuid::Uuid;
use verdant_common::events::LifecycleEvent;
use verdant_common::time;

use super::{require_text, LifecycleService};
use crate::db;
use crate::error::{LifecycleError, Result};
use crate::models::{Batch, BatchStatus, EventType};
use crate::utils::retry_on_conflict;

impl LifecycleService {
    /// Place a batch on hold
    pub async fn quarantine(&self, batch_id: Uuid, reason: &str, actor: &str) -> Result<Batch> {
        let reason = require_text("quarantine reason", reason)?;

        let batch = retry_on_conflict("quarantine", || async {
            let mut tx = self.pool.begin().await?;
            let mut batch = db::batches::load_batch(&mut tx, batch_id).await?;

            batch.ensure_mutable()?;
            if batch.status == BatchStatus::Quarantined {
                return Err(LifecycleError::AlreadyQuarantined(batch_id));
            }

            batch.status = BatchStatus::Quarantined;
            batch.quarantine_reason = Some(reason.clone());
            db::batches::save_batch(&mut tx, &mut batch).await?;
            db::history::append_event(
                &mut tx,
                batch_id,
                EventType::Quarantined,
                actor,
                Some(&reason),
                time::now(),
            )
            .await?;

            tx.commit().await?;
            Ok(batch)
        })
        .await?;

        info!(batch_id = %batch_id, actor, reason = %reason, "Batch quarantined");
        self.emit(LifecycleEvent::Quarantined {
            batch_id,
            reason,
            timestamp: batch.updated_at,
        });

        Ok(batch)
    }

    /// Lift the hold
    pub async fn release(&self, batch_id: Uuid, actor: &str, notes: Option<&str>) -> Result<Batch> {
        let batch = retry_on_conflict("release", || async {
            let mut tx = self.pool.begin().await?;
            let mut batch = db::batches::load_batch(&mut tx, batch_id).await?;

            batch.ensure_mutable()?;
            if batch.status != BatchStatus::Quarantined {
                return Err(LifecycleError::NotQuarantined(batch_id));
            }

            batch.status = BatchStatus::Active;
            batch.quarantine_reason = None;
            db::batches::save_batch(&mut tx, &mut batch).await?;
            db::history::append_event(&mut tx, batch_id, EventType::Released, actor, notes, time::now())
                .await?;

            tx.commit().await?;
            Ok(batch)
        })
        .await?;

        info!(batch_id = %batch_id, actor, "Batch released from quarantine");
        self.emit(LifecycleEvent::Released {
            batch_id,
            timestamp: batch.updated_at,
        });

        Ok(batch)
    }
}
