//! Dispatcher configuration.

use std::time::Duration;

use relay_core::{ConsumerGroup, Limits, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Where a partition with no checkpoint starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// The oldest retained record.
    #[default]
    Earliest,
    /// The current tail: only records appended after start are delivered.
    Latest,
}

/// What a worker does when its position has been purged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiredPolicy {
    /// Jump to the new log start and keep going.
    #[default]
    Resync,
    /// Halt and wait for an operator.
    Halt,
}

/// Configuration for a consumer dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Consumer group whose checkpoints are advanced.
    pub group: ConsumerGroup,
    /// Maximum records per batch.
    pub batch_size: u32,
    /// Handler retries after the first attempt before dead-lettering.
    pub max_retries: u32,
    /// Deadline for one handler invocation.
    pub handler_timeout: Duration,
    /// Backoff between handler attempts and between checkpoint commit
    /// attempts. Its attempt count is not used.
    pub retry_policy: RetryPolicy,
    /// Wait between polls of an empty partition.
    pub poll_interval: Duration,
    /// Start position when no checkpoint exists.
    pub start_position: StartPosition,
    /// Reaction to a purged position.
    pub on_expired: ExpiredPolicy,
    /// Attempts for a transiently failing checkpoint commit or dead-letter
    /// write before the worker halts.
    pub commit_attempts: u32,
}

impl DispatcherConfig {
    /// Creates a configuration with defaults for `group`.
    #[must_use]
    pub fn new(group: ConsumerGroup) -> Self {
        Self {
            group,
            batch_size: 100,
            max_retries: 5,
            handler_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            poll_interval: Duration::from_millis(250),
            start_position: StartPosition::Earliest,
            on_expired: ExpiredPolicy::Resync,
            commit_attempts: 5,
        }
    }

    /// Fast timings for tests.
    #[must_use]
    pub fn for_testing(group: ConsumerGroup) -> Self {
        Self {
            handler_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::for_testing(),
            poll_interval: Duration::from_millis(5),
            ..Self::new(group)
        }
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the handler retry cap.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the handler deadline.
    #[must_use]
    pub const fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Sets the retry backoff policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the start position.
    #[must_use]
    pub const fn with_start_position(mut self, start_position: StartPosition) -> Self {
        self.start_position = start_position;
        self
    }

    /// Sets the expired-position policy.
    #[must_use]
    pub const fn with_on_expired(mut self, on_expired: ExpiredPolicy) -> Self {
        self.on_expired = on_expired;
        self
    }

    /// Sets the commit attempt budget.
    #[must_use]
    pub const fn with_commit_attempts(mut self, commit_attempts: u32) -> Self {
        self.commit_attempts = commit_attempts;
        self
    }

    /// Total handler attempts per batch.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Validates the configuration against `limits`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the first bad field.
    pub fn validate(&self, limits: &Limits) -> DispatchResult<()> {
        if self.batch_size == 0 || self.batch_size > limits.max_batch_records {
            return Err(DispatchError::InvalidConfig {
                name: "batch_size",
                reason: format!("must be in 1..={}", limits.max_batch_records),
            });
        }
        if self.max_retries > limits.max_handler_retries {
            return Err(DispatchError::InvalidConfig {
                name: "max_retries",
                reason: format!("must be at most {}", limits.max_handler_retries),
            });
        }
        if self.handler_timeout.is_zero() || self.handler_timeout > limits.max_handler_timeout {
            return Err(DispatchError::InvalidConfig {
                name: "handler_timeout",
                reason: format!("must be positive and at most {:?}", limits.max_handler_timeout),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(DispatchError::InvalidConfig {
                name: "poll_interval",
                reason: "must be positive".into(),
            });
        }
        if self.commit_attempts == 0 {
            return Err(DispatchError::InvalidConfig {
                name: "commit_attempts",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DispatcherConfig {
        DispatcherConfig::new(ConsumerGroup::new("g").unwrap())
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate(&Limits::default()).is_ok());
        assert_eq!(config().max_attempts(), 6);
    }

    #[test]
    fn test_rejects_bad_values() {
        let limits = Limits::default();
        assert!(config().with_batch_size(0).validate(&limits).is_err());
        assert!(config().with_batch_size(limits.max_batch_records + 1).validate(&limits).is_err());
        assert!(config().with_max_retries(1_000).validate(&limits).is_err());
        assert!(config()
            .with_handler_timeout(Duration::ZERO)
            .validate(&limits)
            .is_err());
        assert!(config().with_commit_attempts(0).validate(&limits).is_err());
    }
}
