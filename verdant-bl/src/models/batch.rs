//! Batch aggregate, stage history and audit events

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::stage::{Domain, Stage};
use crate::error::{LifecycleError, Result};

/// Batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Quarantined,
    Completed,
    Destroyed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Quarantined => "quarantined",
            BatchStatus::Completed => "completed",
            BatchStatus::Destroyed => "destroyed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Destroyed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(BatchStatus::Active),
            "quarantined" => Ok(BatchStatus::Quarantined),
            "completed" => Ok(BatchStatus::Completed),
            "destroyed" => Ok(BatchStatus::Destroyed),
            other => Err(LifecycleError::Validation(format!(
                "unknown batch status '{}'",
                other
            ))),
        }
    }
}

/// Batch aggregate
///
/// Mutated only through `LifecycleService`. `version` increments on every
/// committed mutation and guards against lost updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub domain_type: Domain,
    pub batch_number: String,
    pub stage: Stage,
    pub status: BatchStatus,
    pub plant_count: i64,
    pub site_id: String,
    pub cultivar_id: String,
    pub quarantine_reason: Option<String>,
    pub start_date: NaiveDate,
    pub expected_harvest_date: Option<NaiveDate>,
    pub external_batch_id: Option<String>,
    /// Regulator-issued plant tags
    pub tags: BTreeSet<String>,
    pub active_activation_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Fails for completed/destroyed batches
    pub fn ensure_mutable(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(LifecycleError::Terminal {
                batch_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Fails for terminal or quarantined batches
    pub fn ensure_not_quarantined(&self) -> Result<()> {
        self.ensure_mutable()?;
        if self.status == BatchStatus::Quarantined {
            return Err(LifecycleError::QuarantineBlocked(self.id));
        }
        Ok(())
    }

    pub fn tagged_count(&self) -> i64 {
        self.tags.len() as i64
    }
}

/// Batch creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub domain_type: Domain,
    pub batch_number: String,
    pub stage: Stage,
    pub plant_count: i64,
    pub site_id: String,
    pub cultivar_id: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub expected_harvest_date: Option<NaiveDate>,
    #[serde(default)]
    pub external_batch_id: Option<String>,
}

/// One stage interval; `ended_at` is `None` while open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub batch_id: Uuid,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Audit event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    StageChanged,
    Completed,
    Quarantined,
    Released,
    TagsAssigned,
    PodAssigned,
    PodReleased,
    RecipeActivated,
    RecipeDeactivated,
    RecipeStageAdvanced,
    HarvestRecorded,
    InventoryPosted,
    InventoryPostingFailed,
    Destroyed,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::StageChanged => "STAGE_CHANGED",
            EventType::Completed => "COMPLETED",
            EventType::Quarantined => "QUARANTINED",
            EventType::Released => "RELEASED",
            EventType::TagsAssigned => "TAGS_ASSIGNED",
            EventType::PodAssigned => "POD_ASSIGNED",
            EventType::PodReleased => "POD_RELEASED",
            EventType::RecipeActivated => "RECIPE_ACTIVATED",
            EventType::RecipeDeactivated => "RECIPE_DEACTIVATED",
            EventType::RecipeStageAdvanced => "RECIPE_STAGE_ADVANCED",
            EventType::HarvestRecorded => "HARVEST_RECORDED",
            EventType::InventoryPosted => "INVENTORY_POSTED",
            EventType::InventoryPostingFailed => "INVENTORY_POSTING_FAILED",
            EventType::Destroyed => "DESTROYED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        let event_type = match s {
            "CREATED" => EventType::Created,
            "STAGE_CHANGED" => EventType::StageChanged,
            "COMPLETED" => EventType::Completed,
            "QUARANTINED" => EventType::Quarantined,
            "RELEASED" => EventType::Released,
            "TAGS_ASSIGNED" => EventType::TagsAssigned,
            "POD_ASSIGNED" => EventType::PodAssigned,
            "POD_RELEASED" => EventType::PodReleased,
            "RECIPE_ACTIVATED" => EventType::RecipeActivated,
            "RECIPE_DEACTIVATED" => EventType::RecipeDeactivated,
            "RECIPE_STAGE_ADVANCED" => EventType::RecipeStageAdvanced,
            "HARVEST_RECORDED" => EventType::HarvestRecorded,
            "INVENTORY_POSTED" => EventType::InventoryPosted,
            "INVENTORY_POSTING_FAILED" => EventType::InventoryPostingFailed,
            "DESTROYED" => EventType::Destroyed,
            other => {
                return Err(LifecycleError::Validation(format!(
                    "unknown event type '{}'",
                    other
                )))
            }
        };
        Ok(event_type)
    }
}

/// Append-only audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    pub id: i64,
    pub batch_id: Uuid,
    pub event_type: EventType,
    pub actor: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Result of a stage transition
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub batch: Batch,
    /// Whether a regulator phase-change job was enqueued
    pub sync_enqueued: bool,
}
