//! Recipe day cadence
//!
//! Advances every active recipe activation by one day per tick. The first
//! tick of `tokio::time::interval` fires immediately and is skipped so a
//! restart does not advance days twice.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::services::LifecycleService;

pub struct DayCadence {
    service: LifecycleService,
    interval: Duration,
}

impl DayCadence {
    pub fn new(service: LifecycleService, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Recipe day cadence started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("Recipe day cadence stopped");
    }

    async fn tick(&self) {
        match self.service.advance_all_recipe_days().await {
            Ok(advanced) => info!(advanced, "Recipe days advanced"),
            Err(e) => error!(error = %e, "Recipe day advancement failed"),
        }
    }
}
