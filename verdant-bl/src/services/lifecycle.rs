//! Batch creation, stage transitions and read models

use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;
use verdant_common::events::LifecycleEvent;
use verdant_common::time;

use super::{event_notes, require_text, LifecycleService};
use crate::db;
use crate::error::{LifecycleError, Result};
use crate::models::stage::{is_allowed, next_stages, phase_change};
use crate::models::{
    Batch, BatchEvent, BatchStatus, EventType, NewBatch, PhaseChangeJob, Stage,
    StageHistoryEntry, TransitionOutcome,
};
use crate::utils::retry_on_conflict;

impl LifecycleService {
    /// Register a new batch in its initial stage
    pub async fn create_batch(&self, new: NewBatch, actor: &str) -> Result<Batch> {
        let batch_number = require_text("batch_number", &new.batch_number)?;
        let site_id = require_text("site_id", &new.site_id)?;
        let cultivar_id = require_text("cultivar_id", &new.cultivar_id)?;

        if new.plant_count < 0 {
            return Err(LifecycleError::Validation(format!(
                "plant_count must not be negative, got {}",
                new.plant_count
            )));
        }
        if !new.domain_type.stages().contains(&new.stage) {
            return Err(LifecycleError::UnknownStage {
                domain: new.domain_type,
                stage: new.stage.to_string(),
            });
        }
        if new.stage.is_terminal() {
            return Err(LifecycleError::Validation(format!(
                "a batch cannot start in terminal stage {}",
                new.stage
            )));
        }
        if !self.jurisdiction.permits_stage(new.stage) {
            return Err(LifecycleError::Validation(format!(
                "stage {} is not used in jurisdiction {}",
                new.stage, self.jurisdiction.code
            )));
        }
        if let Some(expected) = new.expected_harvest_date {
            if expected < new.start_date {
                return Err(LifecycleError::Validation(
                    "expected_harvest_date is before start_date".to_string(),
                ));
            }
        }

        let now = time::now();
        let batch = Batch {
            id: Uuid::new_v4(),
            domain_type: new.domain_type,
            batch_number,
            stage: new.stage,
            status: BatchStatus::Active,
            plant_count: new.plant_count,
            site_id,
            cultivar_id,
            quarantine_reason: None,
            start_date: new.start_date,
            expected_harvest_date: new.expected_harvest_date,
            external_batch_id: new
                .external_batch_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            tags: BTreeSet::new(),
            active_activation_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        retry_on_conflict("create_batch", || async {
            let mut tx = self.pool.begin().await?;
            db::batches::insert_batch(&mut tx, &batch).await?;
            db::history::open_stage(&mut tx, batch.id, batch.stage, now).await?;
            db::history::append_event(
                &mut tx,
                batch.id,
                EventType::Created,
                actor,
                Some(&format!("created in stage {}", batch.stage)),
                now,
            )
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!(
            batch_id = %batch.id,
            batch_number = %batch.batch_number,
            domain = %batch.domain_type,
            stage = %batch.stage,
            plant_count = batch.plant_count,
            "Batch created"
        );

        self.emit(LifecycleEvent::BatchCreated {
            batch_id: batch.id,
            batch_number: batch.batch_number.clone(),
            stage: batch.stage.to_string(),
            timestamp: now,
        });

        Ok(batch)
    }

    /// Move a batch to `to` along its domain graph
    ///
    /// A qualifying regulatory phase change is enqueued in the same
    /// transaction; delivery happens later and never affects this result.
    pub async fn transition(
        &self,
        batch_id: Uuid,
        to: Stage,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let (outcome, from) = retry_on_conflict("transition", || {
            self.transition_once(batch_id, to, actor, notes)
        })
        .await?;

        if outcome.sync_enqueued {
            self.sync_notify.notify_one();
        }

        info!(
            batch_id = %batch_id,
            from = %from,
            to = %to,
            actor,
            sync_enqueued = outcome.sync_enqueued,
            "Stage transition committed"
        );

        self.emit(LifecycleEvent::StageChanged {
            batch_id,
            from_stage: from.to_string(),
            to_stage: to.to_string(),
            sync_enqueued: outcome.sync_enqueued,
            timestamp: outcome.batch.updated_at,
        });

        Ok(outcome)
    }

    async fn transition_once(
        &self,
        batch_id: Uuid,
        to: Stage,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<(TransitionOutcome, Stage)> {
        let mut tx = self.pool.begin().await?;
        let mut batch = db::batches::load_batch(&mut tx, batch_id).await?;

        batch.ensure_not_quarantined()?;
        if to == batch.stage {
            return Err(LifecycleError::NoOpTransition(to));
        }
        if to == Stage::Destroyed {
            return Err(LifecycleError::Validation(
                "batches are destroyed through the destruction workflow".to_string(),
            ));
        }
        let from = batch.stage;
        if !is_allowed(batch.domain_type, from, to)? || !self.jurisdiction.permits_stage(to) {
            return Err(LifecycleError::InvalidTransition {
                domain: batch.domain_type,
                from,
                to,
            });
        }

        let now = time::now();
        db::history::close_open_stage(&mut tx, batch_id, now).await?;
        db::history::open_stage(&mut tx, batch_id, to, now).await?;

        batch.stage = to;
        let event_type = if to == Stage::Completed {
            self.close_out(&mut tx, &mut batch, actor, now).await?;
            EventType::Completed
        } else {
            EventType::StageChanged
        };
        db::batches::save_batch(&mut tx, &mut batch).await?;

        db::history::append_event(
            &mut tx,
            batch_id,
            event_type,
            actor,
            Some(&event_notes(format!("{} -> {}", from, to), notes)),
            now,
        )
        .await?;

        let sync_enqueued = self.enqueue_phase_change(&mut tx, &batch, from, now).await?;

        tx.commit().await?;

        Ok((
            TransitionOutcome {
                batch,
                sync_enqueued,
            },
            from,
        ))
    }

    /// Completion frees pods and ends the recipe
    async fn close_out(
        &self,
        conn: &mut SqliteConnection,
        batch: &mut Batch,
        actor: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        batch.status = BatchStatus::Completed;

        let released = db::pods::end_batch_assignments(conn, batch.id, now).await?;
        if let Some(activation_id) = batch.active_activation_id.take() {
            db::recipes::deactivate(conn, activation_id, now, actor, Some("batch completed")).await?;
        }

        debug!(
            batch_id = %batch.id,
            released_assignments = released,
            "Batch closed out on completion"
        );
        Ok(())
    }

    async fn enqueue_phase_change(
        &self,
        conn: &mut SqliteConnection,
        batch: &Batch,
        from: Stage,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        let Some((from_phase, to_phase)) = phase_change(batch.domain_type, from, batch.stage) else {
            return Ok(false);
        };

        if self.jurisdiction.requires_plant_tags && batch.tagged_count() < batch.plant_count {
            warn!(
                batch_id = %batch.id,
                tagged = batch.tagged_count(),
                plant_count = batch.plant_count,
                to_phase = %to_phase,
                "Regulated phase change with incomplete plant tagging"
            );
        }

        if !self.jurisdiction.requires_external_sync {
            debug!(batch_id = %batch.id, "Jurisdiction does not sync phase changes");
            return Ok(false);
        }

        let Some(external_batch_id) = batch.external_batch_id.clone() else {
            debug!(
                batch_id = %batch.id,
                "Batch has no external id, phase change not reported"
            );
            return Ok(false);
        };

        let job = PhaseChangeJob {
            batch_id: batch.id,
            external_batch_id,
            from_phase,
            to_phase,
            occurred_at: now,
        };

        Ok(db::sync_jobs::enqueue_phase_change(conn, &job, now)
            .await?
            .is_some())
    }

    pub async fn get_batch(&self, batch_id: Uuid) -> Result<Batch> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await
    }

    /// Stages the batch may move to next, in preference order
    pub async fn next_stages(&self, batch_id: Uuid) -> Result<Vec<Stage>> {
        let batch = self.get_batch(batch_id).await?;
        if batch.status.is_terminal() {
            return Ok(Vec::new());
        }

        Ok(next_stages(batch.domain_type, batch.stage)?
            .iter()
            .copied()
            .filter(|stage| self.jurisdiction.permits_stage(*stage))
            .collect())
    }

    pub async fn stage_history(&self, batch_id: Uuid) -> Result<Vec<StageHistoryEntry>> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;
        db::history::list_stage_history(&mut conn, batch_id).await
    }

    pub async fn events(&self, batch_id: Uuid) -> Result<Vec<BatchEvent>> {
        let mut conn = self.pool.acquire().await?;
        db::batches::load_batch(&mut conn, batch_id).await?;
        db::history::list_events(&mut conn, batch_id).await
    }
}
