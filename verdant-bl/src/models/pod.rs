//! Pods and pod assignments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Physical growing location (mirror of the pod/room registry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: Uuid,
    pub name: String,
    pub site_id: String,
    /// Maximum plants across active assignments
    pub capacity: i64,
}

/// Plants of a batch placed in a pod; active while `removed_at` is `None`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodAssignment {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub pod_id: Uuid,
    pub plant_count: i64,
    pub assigned_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl PodAssignment {
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }
}
