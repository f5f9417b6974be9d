//! Retry for SQLite lock contention
//!
//! Result writes from a running batch can collide with reviewer edits or a
//! second batch. `SQLITE_BUSY` is retried with exponential backoff (10 ms
//! doubling to 1 s) until the configured wait budget is spent; every other
//! error is returned at once.

use std::future::Future;
use std::time::{Duration, Instant};

use declarant_common::{Error, Result};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// SQLite primary result code for a busy database
const SQLITE_BUSY: &str = "5";

/// Whether an error is transient lock contention
pub fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let busy_code = db_err
                .as_database_error()
                .and_then(|e| e.code())
                .is_some_and(|code| code == SQLITE_BUSY);
            busy_code || db_err.to_string().contains("database is locked")
        }
        _ => false,
    }
}

/// Run `operation`, retrying while the database is locked
///
/// Gives up with `Error::Internal` once `max_wait_ms` has elapsed.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Database write succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => {
                let elapsed = started.elapsed();
                if elapsed >= budget {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        max_wait_ms,
                        "Database still locked, giving up"
                    );
                    return Err(Error::Internal(format!(
                        "{}: database locked after {} attempts ({} ms)",
                        operation_name,
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
