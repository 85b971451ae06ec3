//! Retry helpers for broker connections and consumer-side processing
//!
//! Consumers use [`retry_with_backoff`] to absorb transient failures locally
//! before settling a delivery negatively; service startup uses
//! [`connect_with_retry`] to wait out a broker that is still coming up.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy: how many attempts, and how the wait between them grows
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles each retry
    pub initial_backoff: Duration,
    /// Ceiling on the doubled backoff
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Startup policy for dialing the broker: up to 15 attempts, a fixed
    /// 2 seconds apart, then give up and let the process die.
    pub fn broker_connect() -> Self {
        Self {
            max_attempts: 15,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Run a fallible async operation under a [`RetryConfig`].
///
/// `context` names the operation in log lines. Returns the first success, or
/// the last error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = config.initial_backoff;
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(context = %context, attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if attempt == max_attempts => {
                warn!(
                    context = %context,
                    attempts = attempt,
                    error = %e,
                    "operation failed after max retries"
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    context = %context,
                    attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "operation failed, retrying with backoff"
                );
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }

    unreachable!("loop returns on the final attempt")
}

/// Dial the NATS server, retrying under [`RetryConfig::broker_connect`].
pub async fn connect_with_retry(url: &str) -> Result<async_nats::Client, async_nats::ConnectError> {
    retry_with_backoff(
        || async_nats::connect(url),
        &RetryConfig::broker_connect(),
        "broker_connect",
    )
    .await
}
