//! HTTP API handlers for verdant-bl
//!
//! Thin JSON wrapper over `LifecycleService`. Callers identify themselves
//! with an `actor` field; authentication is the caller's concern.

pub mod batches;
pub mod harvest;
pub mod health;
pub mod pods;
pub mod recipes;
pub mod sse;
pub mod sync;

pub use batches::batch_routes;
pub use harvest::harvest_routes;
pub use health::health_routes;
pub use pods::pod_routes;
pub use recipes::recipe_routes;
pub use sse::event_stream;
pub use sync::sync_routes;
