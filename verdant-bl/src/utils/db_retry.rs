//! Conflict retry for batch and pod mutations
//!
//! Every mutation runs as one transaction that reads, validates and writes
//! with a version check. When the check loses a race (or SQLite reports a
//! lock), the whole operation is re-run so preconditions are validated
//! against fresh state instead of overwriting it.

use std::time::{Duration, Instant};

use crate::error::Result;

const MAX_ATTEMPTS: u32 = 8;
const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 320;

/// Re-run `operation` while it fails with a retryable conflict
///
/// Non-conflict errors return immediately. After `MAX_ATTEMPTS` the last
/// conflict error is returned to the caller.
pub async fn retry_on_conflict<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after conflict retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_retryable_conflict() && attempt < MAX_ATTEMPTS => {
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Conflict detected, re-reading and retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => {
                if err.is_retryable_conflict() {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Conflict retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}
