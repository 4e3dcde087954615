//! # Verdant Common Library
//!
//! Shared code for Verdant services:
//! - Error type
//! - TOML bootstrap configuration (jurisdiction, sync, regulator, cadence)
//! - SQLite schema initialization
//! - Lifecycle event bus
//! - Time helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
