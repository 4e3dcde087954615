//! Destruction options and waste logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestroyOptions {
    /// Write a waste log; also acknowledges the waste manifest
    #[serde(default)]
    pub create_waste_log: bool,
    /// Allow destroying a quarantined batch
    #[serde(default)]
    pub override_quarantine: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasteLog {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub plant_count: i64,
    pub reason: String,
    pub logged_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of `destroy`
#[derive(Debug, Clone, Serialize)]
pub struct DestroyOutcome {
    pub batch: super::Batch,
    pub released_assignments: usize,
    pub deactivated_activation: Option<Uuid>,
    pub waste_log: Option<WasteLog>,
}
