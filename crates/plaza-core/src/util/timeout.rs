//! Deadline guard for async operations.
//!
//! Every call to the shared store runs under [`with_timeout`] so a hung
//! connection surfaces as a typed failure instead of a stuck future. The
//! timer is dropped on every exit path; a timeout and an operation error are
//! never confused with each other.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Race `fut` against `limit`.
///
/// If the deadline fires first the result is [`Error::Timeout`] carrying
/// `operation` and the configured limit; the wrapped future is dropped. If
/// the operation finishes first its result, success or failure, passes
/// through unchanged.
pub async fn with_timeout<F, T>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
