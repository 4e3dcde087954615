//! Regulatory phase-change jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::stage::RegulatoryPhase;
use crate::error::{LifecycleError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting for its first or next attempt
    Pending,
    /// Claimed by a worker
    InFlight,
    Synced,
    /// Attempts exhausted; operator re-trigger required
    Failed,
    /// Overtaken by a newer phase change before execution
    Superseded,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InFlight => "in_flight",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "in_flight" => Ok(SyncStatus::InFlight),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            "superseded" => Ok(SyncStatus::Superseded),
            other => Err(LifecycleError::Validation(format!(
                "unknown sync status '{}'",
                other
            ))),
        }
    }
}

/// Payload sent to the regulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChangeJob {
    pub batch_id: Uuid,
    pub external_batch_id: String,
    pub from_phase: RegulatoryPhase,
    pub to_phase: RegulatoryPhase,
    pub occurred_at: DateTime<Utc>,
}

/// Persisted job with delivery state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    /// Enqueue order; jobs of one batch are delivered in `seq` order
    pub seq: i64,
    pub job: PhaseChangeJob,
    pub status: SyncStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub confirmation_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}
