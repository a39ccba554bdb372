//! Query timeout helpers.
//!
//! Store operations are expected to complete quickly; these wrappers turn a
//! stalled query into an error instead of an indefinite hang.

use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for single queries
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for multi-statement transactions
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for timeout operations
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    /// Operation timed out
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for timeout operations
pub type TimeoutResult<T> = Result<T, TimeoutError>;

/// Execute a database future with a timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> TimeoutResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutError::Database(e)),
        Err(_) => Err(TimeoutError::Timeout(duration)),
    }
}

/// Execute a query with the default timeout
pub async fn with_default_timeout<F, T>(future: F) -> TimeoutResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    with_timeout(DEFAULT_QUERY_TIMEOUT, future).await
}

/// Execute a multi-statement unit of work with the transaction timeout
pub async fn with_transaction_timeout<F, T>(future: F) -> TimeoutResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    with_timeout(DEFAULT_TRANSACTION_TIMEOUT, future).await
}

/// Fold a timeout back into the sqlx error space used by the store error enums.
///
/// Timeouts become `sqlx::Error::PoolTimedOut`, which the stores already treat
/// as a storage failure.
pub fn into_sqlx(err: TimeoutError) -> sqlx::Error {
    match err {
        TimeoutError::Database(e) => e,
        TimeoutError::Timeout(_) => sqlx::Error::PoolTimedOut,
    }
}
