//! Lifecycle event types and EventBus
//!
//! Events are broadcast after a mutation commits. They are a notification
//! channel only; the durable audit trail is the `batch_events` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Verdant lifecycle events
///
/// Stage, status and phase values use their stored (snake_case) names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    /// Batch created
    BatchCreated {
        batch_id: Uuid,
        batch_number: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// Stage transition committed
    ///
    /// Triggers:
    /// - SSE: Update batch boards
    StageChanged {
        batch_id: Uuid,
        from_stage: String,
        to_stage: String,
        /// Whether a regulator phase-change job was enqueued
        sync_enqueued: bool,
        timestamp: DateTime<Utc>,
    },

    /// Batch placed on hold
    Quarantined {
        batch_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Hold lifted
    Released {
        batch_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Plant tags appended
    TagsAssigned {
        batch_id: Uuid,
        assigned: usize,
        tagged_total: i64,
        plant_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// Recipe activation bound to a batch
    RecipeActivated {
        batch_id: Uuid,
        activation_id: Uuid,
        recipe_version_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Recipe activation ended
    RecipeDeactivated {
        batch_id: Uuid,
        activation_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Harvest weights recorded
    HarvestRecorded {
        batch_id: Uuid,
        harvest_id: Uuid,
        wet_weight: f64,
        timestamp: DateTime<Utc>,
    },

    /// Finished-good receipt posted (or failed) for a harvest
    InventoryPosting {
        batch_id: Uuid,
        harvest_id: Uuid,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// Batch destroyed (terminal)
    BatchDestroyed {
        batch_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Regulator sync job changed status
    ///
    /// Triggers:
    /// - SSE: Surface failed jobs to operators
    SyncStatusChanged {
        job_id: Uuid,
        batch_id: Uuid,
        status: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Event type name for SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::BatchCreated { .. } => "BatchCreated",
            LifecycleEvent::StageChanged { .. } => "StageChanged",
            LifecycleEvent::Quarantined { .. } => "Quarantined",
            LifecycleEvent::Released { .. } => "Released",
            LifecycleEvent::TagsAssigned { .. } => "TagsAssigned",
            LifecycleEvent::RecipeActivated { .. } => "RecipeActivated",
            LifecycleEvent::RecipeDeactivated { .. } => "RecipeDeactivated",
            LifecycleEvent::HarvestRecorded { .. } => "HarvestRecorded",
            LifecycleEvent::InventoryPosting { .. } => "InventoryPosting",
            LifecycleEvent::BatchDestroyed { .. } => "BatchDestroyed",
            LifecycleEvent::SyncStatusChanged { .. } => "SyncStatusChanged",
        }
    }
}

/// Broadcast bus for lifecycle events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
