//! System limits and configuration bounds.
//!
//! Put limits on everything. Every queue, buffer, and resource has an
//! explicit maximum size so growth stays bounded and predictable.

use std::time::Duration;

use crate::error::{Error, Result};

/// System-wide limits for Relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Record limits.
    /// Maximum size of a single record payload in bytes.
    pub max_payload_bytes: u32,
    /// Maximum size of a partition key in bytes.
    pub max_partition_key_bytes: u32,

    // Batch limits.
    /// Maximum number of records appended or delivered as one batch.
    pub max_batch_records: u32,

    // Topology limits.
    /// Maximum number of partitions in a stream.
    pub max_partitions: u32,

    // Consumer limits.
    /// Maximum handler retries before a batch is dead-lettered.
    pub max_handler_retries: u32,
    /// Maximum handler deadline.
    pub max_handler_timeout: Duration,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Records: 1MB payload, 256B key.
            max_payload_bytes: 1024 * 1024,
            max_partition_key_bytes: 256,

            // Batches: 10k records.
            max_batch_records: 10_000,

            // Topology: 1024 partitions.
            max_partitions: 1024,

            // Consumers: 100 retries, 15 minute handler deadline.
            max_handler_retries: 100,
            max_handler_timeout: Duration::from_secs(15 * 60),
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_bytes == 0 {
            return Err(Error::InvalidArgument {
                name: "max_payload_bytes",
                reason: "must be positive",
            });
        }

        if self.max_partition_key_bytes == 0 {
            return Err(Error::InvalidArgument {
                name: "max_partition_key_bytes",
                reason: "must be positive",
            });
        }

        if self.max_batch_records == 0 {
            return Err(Error::InvalidArgument {
                name: "max_batch_records",
                reason: "must be positive",
            });
        }

        if self.max_partitions == 0 {
            return Err(Error::InvalidArgument {
                name: "max_partitions",
                reason: "must be positive",
            });
        }

        if self.max_handler_timeout.is_zero() {
            return Err(Error::InvalidArgument {
                name: "max_handler_timeout",
                reason: "must be positive",
            });
        }

        Ok(())
    }

    /// Checks a partition key and payload against the record limits.
    ///
    /// # Errors
    /// Returns `LimitExceeded` if either exceeds its bound.
    pub fn check_record(&self, partition_key: &[u8], payload: &[u8]) -> Result<()> {
        if partition_key.len() > self.max_partition_key_bytes as usize {
            return Err(Error::LimitExceeded {
                limit: "partition_key_bytes",
                max: u64::from(self.max_partition_key_bytes),
                actual: partition_key.len() as u64,
            });
        }

        if payload.len() > self.max_payload_bytes as usize {
            return Err(Error::LimitExceeded {
                limit: "payload_bytes",
                max: u64::from(self.max_payload_bytes),
                actual: payload.len() as u64,
            });
        }

        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        let limits = Limits::new();
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_invalid_payload_size() {
        let mut limits = Limits::new();
        limits.max_payload_bytes = 0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_zero_partitions() {
        let mut limits = Limits::new();
        limits.max_partitions = 0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_check_record() {
        let mut limits = Limits::new();
        limits.max_payload_bytes = 4;
        limits.max_partition_key_bytes = 2;

        assert!(limits.check_record(b"k", b"abcd").is_ok());
        assert!(matches!(
            limits.check_record(b"k", b"abcde"),
            Err(Error::LimitExceeded { limit: "payload_bytes", .. })
        ));
        assert!(matches!(
            limits.check_record(b"key", b"a"),
            Err(Error::LimitExceeded { limit: "partition_key_bytes", .. })
        ));
    }
}
