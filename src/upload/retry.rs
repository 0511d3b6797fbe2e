//! Bounded network calls

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 2;

/// Run `op` under `timeout`, retrying once on failure or timeout
pub async fn with_timeout_retry<T, F, Fut>(timeout: Duration, what: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    bounded(timeout, what, true, op).await
}

/// Run `op` under `timeout`, retrying once only if it returned an error.
///
/// For writes that are not idempotent: a timed-out call may still have
/// landed on the remote side, so it is never repeated.
pub async fn with_timeout_retry_on_error<T, F, Fut>(timeout: Duration, what: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    bounded(timeout, what, false, op).await
}

async fn bounded<T, F, Fut>(timeout: Duration, what: &str, retry_timeout: bool, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = anyhow!("{} was not attempted", what);

    for attempt in 1..=MAX_ATTEMPTS {
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                tracing::warn!("{} failed (attempt {}/{}): {:#}", what, attempt, MAX_ATTEMPTS, e);
                last_error = e;
            }
            Err(_) => {
                tracing::warn!(
                    "{} timed out after {:?} (attempt {}/{})",
                    what,
                    timeout,
                    attempt,
                    MAX_ATTEMPTS
                );
                let error = anyhow!("{} timed out after {:?}", what, timeout);
                if !retry_timeout {
                    return Err(error);
                }
                last_error = error;
            }
        }
    }

    Err(last_error)
}
