//! Database access for verdant-bl
//!
//! Functions take `&mut SqliteConnection` so the service layer can run
//! several of them inside one transaction (`&mut *tx`) or on a pooled
//! connection for plain reads.

pub mod batches;
pub mod harvests;
pub mod history;
pub mod pods;
pub mod recipes;
pub mod sync_jobs;
pub mod tags;
pub mod waste;

use chrono::NaiveDate;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LifecycleError, Result};

pub(crate) fn corrupt(column: &str, detail: impl Display) -> LifecycleError {
    LifecycleError::Common(verdant_common::Error::Internal(format!(
        "Failed to parse {}: {}",
        column, detail
    )))
}

pub(crate) fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| corrupt(column, e))
}

pub(crate) fn parse_uuid_opt(column: &str, value: Option<String>) -> Result<Option<Uuid>> {
    value.map(|v| parse_uuid(column, &v)).transpose()
}

/// Parse a stored enum column
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e| corrupt(column, e))
}

pub(crate) fn parse_date(column: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| corrupt(column, e))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
