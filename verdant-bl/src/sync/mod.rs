//! Regulatory sync
//!
//! Phase changes are queued in `sync_jobs` by the lifecycle service and
//! delivered by [`SyncCoordinator`] through a [`RegulatoryClient`].

pub mod client;
pub mod coordinator;

pub use client::{HttpRegulatoryClient, RegulatoryClient, SyncReceipt};
pub use coordinator::{backoff_delay, SyncCoordinator};
