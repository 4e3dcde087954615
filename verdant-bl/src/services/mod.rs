//! Lifecycle service
//!
//! `LifecycleService` is the only writer of the batch aggregate. Each
//! mutating operation runs as a single transaction that re-reads the batch,
//! validates preconditions and writes with a version check; a lost race is
//! retried from the read (see `utils::db_retry`). Lifecycle events are
//! broadcast only after the transaction commits.

mod destruction;
mod harvest;
mod lifecycle;
mod pods;
mod quarantine;
mod recipes;
mod sync;
mod tags;

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;
use verdant_common::events::{EventBus, LifecycleEvent};
use verdant_common::time;

use crate::collaborators::{InventoryService, TelemetryFeed};
use crate::db;
use crate::error::Result;
use crate::jurisdiction::Jurisdiction;
use crate::models::EventType;

#[derive(Clone)]
pub struct LifecycleService {
    pool: SqlitePool,
    jurisdiction: Arc<Jurisdiction>,
    event_bus: EventBus,
    sync_notify: Arc<Notify>,
    inventory: Arc<dyn InventoryService>,
    telemetry: Arc<dyn TelemetryFeed>,
}

impl LifecycleService {
    pub fn new(
        pool: SqlitePool,
        jurisdiction: Jurisdiction,
        event_bus: EventBus,
        inventory: Arc<dyn InventoryService>,
        telemetry: Arc<dyn TelemetryFeed>,
    ) -> Self {
        Self {
            pool,
            jurisdiction: Arc::new(jurisdiction),
            event_bus,
            sync_notify: Arc::new(Notify::new()),
            inventory,
            telemetry,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn jurisdiction(&self) -> &Jurisdiction {
        &self.jurisdiction
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Signalled after a commit that enqueued or re-triggered a sync job
    pub fn sync_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.sync_notify)
    }

    fn emit(&self, event: LifecycleEvent) {
        self.event_bus.emit_lossy(event);
    }

    /// Append an audit event outside a mutation transaction
    ///
    /// Used for follow-up records (inventory posting outcome) whose failure
    /// must not hide the result of the step that already committed.
    async fn append_event_detached(
        &self,
        batch_id: Uuid,
        event_type: EventType,
        actor: &str,
        notes: &str,
    ) {
        let result = async {
            let mut conn = self.pool.acquire().await?;
            db::history::append_event(&mut conn, batch_id, event_type, actor, Some(notes), time::now())
                .await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                batch_id = %batch_id,
                event_type = %event_type,
                error = %e,
                "Failed to append audit event"
            );
        }
    }
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(crate::error::LifecycleError::Validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(trimmed.to_string())
}

/// Join an operation summary with caller notes for the audit trail
pub(crate) fn event_notes(summary: String, notes: Option<&str>) -> String {
    match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(notes) => format!("{}: {}", summary, notes),
        None => summary,
    }
}
