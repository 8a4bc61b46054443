//! Per-partition append throttling.
//!
//! A token bucket allows controlled bursting while enforcing an average
//! append rate. One token is one record. When the bucket cannot cover an
//! append, the caller is told how long to wait instead of being blocked.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum number of tokens the bucket can hold.
    pub capacity: u64,
    /// Tokens added per second.
    pub refill_rate: u64,
    /// Initial number of tokens (defaults to capacity if not set).
    #[serde(default)]
    pub initial_tokens: Option<u64>,
}

impl TokenBucketConfig {
    /// Creates a new token bucket configuration.
    #[must_use]
    pub const fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            capacity,
            refill_rate,
            initial_tokens: None,
        }
    }

    /// Sets the initial number of tokens.
    #[must_use]
    pub const fn with_initial_tokens(mut self, tokens: u64) -> Self {
        self.initial_tokens = Some(tokens);
        self
    }
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self::new(10_000, 1_000)
    }
}

/// Why a bucket refused to hand out tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Not enough tokens right now; retry after the given wait.
    RetryAfter(Duration),
    /// The request exceeds the bucket capacity and can never succeed.
    ExceedsCapacity,
}

/// A token bucket rate limiter driven by an externally supplied clock.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: u64,
    capacity: u64,
    refill_rate: u64,
    /// Last time tokens were refilled (microseconds).
    last_refill_us: u64,
}

impl TokenBucket {
    /// Creates a new token bucket.
    #[must_use]
    pub fn new(config: &TokenBucketConfig, current_time_us: u64) -> Self {
        let initial = config.initial_tokens.unwrap_or(config.capacity);
        Self {
            tokens: initial.min(config.capacity),
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            last_refill_us: current_time_us,
        }
    }

    /// Returns the number of tokens available without refilling.
    #[must_use]
    pub const fn available_tokens(&self) -> u64 {
        self.tokens
    }

    /// Refills the bucket based on elapsed time. Returns the tokens added.
    pub fn refill(&mut self, current_time_us: u64) -> u64 {
        // Time may go backwards in simulation.
        if current_time_us <= self.last_refill_us || self.refill_rate == 0 {
            return 0;
        }

        let elapsed_us = current_time_us - self.last_refill_us;
        let earned = u64::try_from(
            (u128::from(elapsed_us) * u128::from(self.refill_rate)) / 1_000_000,
        )
        .unwrap_or(u64::MAX);
        if earned == 0 {
            return 0;
        }

        let added = earned.min(self.capacity - self.tokens);
        self.tokens += added;
        if self.tokens == self.capacity {
            self.last_refill_us = current_time_us;
        } else {
            // Keep the fractional remainder for the next refill.
            let used_us = earned.saturating_mul(1_000_000) / self.refill_rate;
            self.last_refill_us = self.last_refill_us.saturating_add(used_us);
        }
        added
    }

    /// Takes `tokens` from the bucket if available.
    ///
    /// # Errors
    /// Returns the wait until enough tokens accrue, or `ExceedsCapacity` if
    /// the request is larger than the bucket.
    pub fn try_acquire(&mut self, tokens: u64, current_time_us: u64) -> Result<(), Refusal> {
        if tokens > self.capacity {
            return Err(Refusal::ExceedsCapacity);
        }

        self.refill(current_time_us);
        if self.tokens >= tokens {
            self.tokens -= tokens;
            return Ok(());
        }

        if self.refill_rate == 0 {
            return Err(Refusal::ExceedsCapacity);
        }
        let needed = tokens - self.tokens;
        let wait_us = needed.saturating_mul(1_000_000).div_ceil(self.refill_rate);
        Err(Refusal::RetryAfter(Duration::from_micros(wait_us)))
    }
}
