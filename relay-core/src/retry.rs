//! Retry with exponential backoff and jitter.
//!
//! Shared by the producer (retrying throttled appends) and the consumer
//! dispatcher (retrying failed handler invocations and checkpoint commits).
//!
//! ```text
//! backoff(attempt)  = min(initial_backoff * multiplier^attempt, max_backoff)
//! jittered(attempt) = backoff(attempt) * uniform(0.75, 1.25)
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Randomize each delay by ±25% to avoid synchronized retry storms.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and default timings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A fast policy for tests: millisecond backoffs, no jitter.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub const fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns the un-jittered backoff before retry number `attempt` (0-indexed).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss
    )]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(63) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_millis = self.max_backoff.as_millis() as f64;
        Duration::from_millis(millis.min(max_millis).max(0.0) as u64)
    }

    /// Returns the delay to sleep before retry number `attempt`, with jitter
    /// applied when enabled.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        base.mul_f64(factor).min(self.max_backoff.mul_f64(1.25))
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
///
/// `is_retryable` decides per error whether another attempt is allowed.
/// Returns the final result together with the number of attempts made.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut operation: F,
) -> (Result<T, E>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return (Ok(value), attempt);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return (Err(err), attempt);
                }
                if attempt >= max_attempts {
                    warn!(attempt, max_attempts, error = %err, "Retries exhausted");
                    return (Err(err), attempt);
                }

                let delay = policy.delay(attempt - 1);
                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retryable error, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}
