//! Execution controls for external calls: per-attempt timeout and bounded
//! retry with exponential backoff.
//!
//! Every call to the model or the memory store goes through
//! [`call_with_retry`]. A timeout counts as a failed attempt; exhaustion is
//! reported as [`RetryExhausted`] and never as success.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry budget and per-attempt timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub backoff_base_ms: u64,
    /// Wall-clock limit for a single attempt.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Every attempt failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub operation: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Run `call` under `policy`.
///
/// `call` is invoked once per attempt and must build a fresh future each time.
pub async fn call_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let timeout = Duration::from_millis(policy.timeout_ms);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => last_error = err.to_string(),
            Err(_) => last_error = format!("timed out after {}ms", policy.timeout_ms),
        }

        warn!(
            operation = %operation,
            attempt = attempt,
            max_attempts = max_attempts,
            error = %last_error,
            "external call failed"
        );

        if attempt < max_attempts {
            tokio::time::sleep(policy.backoff_delay(attempt)).await;
        }
    }

    Err(RetryExhausted {
        operation: operation.to_string(),
        attempts: max_attempts,
        last_error,
    })
}
