//! Retry utilities.
//!
//! Exponential backoff for operations whose errors may be transient, such as
//! exporting a batch of metrics to a remote backend.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 means a single attempt)
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Factor applied to the delay after each retry
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryConfig {
    /// Exponential backoff starting at 100ms, doubling up to 10s.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    /// A single attempt with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Set the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let factor = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        if !delay_ms.is_finite() {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Run `operation`, retrying while `should_retry` accepts the error and
/// retries remain. The last error is returned when giving up.
///
/// # Examples
///
/// ```no_run
/// use rpc_metrics_common::retry::{retry_if, RetryConfig};
///
/// # async fn run() {
/// let result = retry_if(
///     &RetryConfig::exponential(3),
///     || async { Err::<(), _>(std::io::Error::from(std::io::ErrorKind::TimedOut)) },
///     |err| err.kind() == std::io::ErrorKind::TimedOut,
/// )
/// .await;
/// assert!(result.is_err());
/// # }
/// ```
pub async fn retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if retry >= config.max_retries || !should_retry(&error) {
                    return Err(error);
                }

                retry += 1;
                let delay = config.delay_for(retry);
                tracing::debug!(
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying operation after transient error"
                );
                sleep(delay).await;
            }
        }
    }
}
