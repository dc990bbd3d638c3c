//! Database retry logic
//!
//! SQLite allows a single writer at a time; a session-start transaction can
//! lose the write lock race against another request. Lock errors get one
//! internal retry with the same transaction semantics, then surface as
//! [`Error::Conflict`] for the caller to map to 409.

use std::time::Duration;

use crate::{Error, Result};

/// Delay before the single retry attempt
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Retry a database operation once if it failed on lock contention.
///
/// Non-lock errors are returned immediately. A lock error on the retry is
/// converted to [`Error::Conflict`].
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match operation().await {
        Ok(result) => Ok(result),
        Err(err) if is_lock_error(&err) => {
            tracing::warn!(
                operation = operation_name,
                "Database locked, retrying once after backoff"
            );
            tokio::time::sleep(RETRY_BACKOFF).await;

            match operation().await {
                Ok(result) => {
                    tracing::debug!(operation = operation_name, "Database operation succeeded after retry");
                    Ok(result)
                }
                Err(err) if is_lock_error(&err) => {
                    tracing::error!(operation = operation_name, "Database still locked after retry");
                    Err(Error::Conflict(format!(
                        "Database locked during {}",
                        operation_name
                    )))
                }
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let msg = db_err.to_string();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}
