//! External collaborators consumed by the lifecycle core
//!
//! Each collaborator is a trait so deployments (and tests) can substitute
//! their own implementation. Bundled defaults:
//! - `SqliteInventory`: item catalog and receive movements in the local database
//! - `InMemoryTelemetryFeed`: latest reading per pod, pushed by the telemetry bridge

pub mod inventory;
pub mod telemetry;

pub use inventory::{InventoryItem, InventoryReceipt, InventoryService, SqliteInventory};
pub use telemetry::{InMemoryTelemetryFeed, TelemetryFeed};
