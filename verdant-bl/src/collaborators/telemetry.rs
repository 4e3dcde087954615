//! Telemetry feed collaborator (read-only)

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::TelemetryReading;

#[async_trait]
pub trait TelemetryFeed: Send + Sync {
    /// Latest reading of a pod, `None` if the pod never reported
    async fn latest_reading(&self, pod_id: Uuid) -> Result<Option<TelemetryReading>>;
}

/// Keeps the newest reading per pod
#[derive(Default)]
pub struct InMemoryTelemetryFeed {
    readings: RwLock<HashMap<Uuid, TelemetryReading>>,
}

impl InMemoryTelemetryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reading unless a newer one is already held
    pub async fn record(&self, reading: TelemetryReading) {
        let mut readings = self.readings.write().await;
        match readings.get(&reading.pod_id) {
            Some(current) if current.timestamp > reading.timestamp => {
                tracing::debug!(
                    pod_id = %reading.pod_id,
                    "Ignoring telemetry older than the held reading"
                );
            }
            _ => {
                readings.insert(reading.pod_id, reading);
            }
        }
    }
}

#[async_trait]
impl TelemetryFeed for InMemoryTelemetryFeed {
    async fn latest_reading(&self, pod_id: Uuid) -> Result<Option<TelemetryReading>> {
        Ok(self.readings.read().await.get(&pod_id).cloned())
    }
}
