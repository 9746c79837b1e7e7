//! Exponential backoff for transient transport failures.

use crate::remote::TransportResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently to retry a boundary call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled after each one
    pub retry_delay_ms: u64,
    /// Upper bound for the delay
    pub retry_max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            retry_max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping, for tests and dry runs
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay_ms: 0,
            retry_max_delay_ms: 0,
        }
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last error is returned.
pub async fn retry_transport<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut f: F,
) -> TransportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<T>>,
{
    let mut delay_ms = policy.retry_delay_ms;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    "{op_name}: transient error (attempt {}/{}), retrying: {e}",
                    attempt, policy.max_retries
                );
                if delay_ms > 0 {
                    let jitter = rand::random::<u64>() % delay_ms;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(policy.retry_max_delay_ms);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sleep schedule used while waiting for a resource to become visible
pub(crate) async fn backoff_sleep(policy: &RetryPolicy, attempt: u32) {
    let delay = policy
        .retry_delay_ms
        .saturating_mul(1u64 << attempt.min(16))
        .min(policy.retry_max_delay_ms);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
