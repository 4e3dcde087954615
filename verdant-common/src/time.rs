//! Timestamp utilities
//!
//! Timestamps are stored in SQLite as fixed-width RFC 3339 text in UTC
//! (microsecond precision, `Z` suffix), so text order matches time order and
//! SQL comparisons such as `next_attempt_at <= ?` work on the raw column.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Get current UTC timestamp, truncated to the stored precision
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn from_db(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| from_db(column, &v)).transpose()
}
