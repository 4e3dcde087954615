//! Harvest records and inventory posting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LifecycleError;

/// Weights captured at harvest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestInput {
    pub wet_weight: f64,
    #[serde(default)]
    pub dry_weight: Option<f64>,
    #[serde(default)]
    pub waste_weight: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub wet_weight: f64,
    pub dry_weight: Option<f64>,
    pub waste_weight: Option<f64>,
    pub notes: Option<String>,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
    /// Inventory receipt posted for this harvest, if any
    pub inventory_entry_id: Option<Uuid>,
}

/// Per-plant wet weight keyed by plant tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantWeight {
    pub tag: String,
    pub wet_weight: f64,
}

/// Finished-good receipt request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryPostingRequest {
    pub item_id: Uuid,
    /// Defaults to dry weight, then wet weight
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Defaults to `{batch_number}-{YYYYMMDD}`
    #[serde(default)]
    pub lot_code: Option<String>,
}

fn default_unit() -> String {
    "g".to_string()
}

/// Inventory movement kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Receive,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Receive => "receive",
        }
    }
}

impl FromStr for MovementType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receive" => Ok(MovementType::Receive),
            other => Err(LifecycleError::Validation(format!(
                "unknown movement type '{}'",
                other
            ))),
        }
    }
}

/// Posted movement (owned by the inventory collaborator)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryUsageEntry {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub item_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: f64,
    pub unit: String,
    pub lot_code: String,
    pub timestamp: DateTime<Utc>,
}

/// Inventory step of a harvest
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InventoryPostingStatus {
    NotRequested,
    Posted { entry: InventoryUsageEntry },
    /// Harvest kept; posting can be retried on its own
    Failed { code: String, message: String },
}

/// Result of `record_harvest`
#[derive(Debug, Clone, Serialize)]
pub struct HarvestOutcome {
    pub harvest: HarvestRecord,
    pub inventory: InventoryPostingStatus,
}

impl HarvestOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self.inventory, InventoryPostingStatus::Failed { .. })
    }

    /// Map a failed posting to `PartialSuccess` for callers that want an error
    pub fn into_result(self) -> Result<HarvestOutcome, LifecycleError> {
        match &self.inventory {
            InventoryPostingStatus::Failed { message, .. } => Err(LifecycleError::PartialSuccess {
                completed: format!("harvest {}", self.harvest.id),
                failed_step: "inventory posting",
                reason: message.clone(),
            }),
            _ => Ok(self),
        }
    }
}
