//! Partition error types.

use std::time::Duration;

use relay_core::{ErrorKind, PartitionId, SequenceId};
use thiserror::Error;

/// Result type for partition operations.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Log store and producer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    /// Caller supplied an invalid argument.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// The argument name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The partition does not exist in this store.
    #[error("{partition_id} does not exist (partition count {partition_count})")]
    UnknownPartition {
        /// Requested partition.
        partition_id: PartitionId,
        /// Number of partitions in the store.
        partition_count: u32,
    },

    /// The requested sequence id is below the retention horizon.
    #[error("{partition_id}: sequence {requested} expired, log now starts at {horizon}")]
    DataExpired {
        /// Partition that was read.
        partition_id: PartitionId,
        /// Requested sequence id.
        requested: SequenceId,
        /// First sequence id still retained.
        horizon: SequenceId,
    },

    /// The partition's append rate is exhausted.
    #[error("{partition_id} throttled, retry after {retry_after:?}")]
    Throttled {
        /// Partition that refused the append.
        partition_id: PartitionId,
        /// Suggested wait before retrying.
        retry_after: Duration,
    },

    /// The producer gave up after exhausting its retries.
    #[error("delivery to {partition_id} failed after {attempts} attempts: {last_error}")]
    DeliveryFailed {
        /// Target partition.
        partition_id: PartitionId,
        /// Attempts made.
        attempts: u32,
        /// The last error observed.
        last_error: String,
        /// Wait hint from the final refusal, when the store was throttling.
        retry_after: Option<Duration>,
    },

    /// A segment cannot accept the append.
    #[error("segment full: {reason}")]
    SegmentFull {
        /// Reason for being full.
        reason: &'static str,
    },

    /// Data corruption detected.
    #[error("data corruption: {message}")]
    Corruption {
        /// Description of corruption.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// Configuration error description.
        message: String,
    },
}

impl PartitionError {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidConfig { .. } => ErrorKind::InvalidArgument,
            Self::UnknownPartition { .. } | Self::SegmentFull { .. } => ErrorKind::InvalidState,
            Self::DataExpired { .. } => ErrorKind::DataExpired,
            Self::Throttled { .. } => ErrorKind::Throttled,
            Self::DeliveryFailed { .. } => ErrorKind::DeliveryFailed,
            Self::Corruption { .. } => ErrorKind::Corruption,
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

impl From<relay_core::Error> for PartitionError {
    fn from(err: relay_core::Error) -> Self {
        match err {
            relay_core::Error::InvalidArgument { name, reason } => Self::InvalidArgument {
                name,
                reason: reason.to_string(),
            },
            relay_core::Error::LimitExceeded { limit, max, actual } => Self::InvalidArgument {
                name: limit,
                reason: format!("{actual} exceeds limit {max}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PartitionError::DataExpired {
            partition_id: PartitionId::new(0),
            requested: SequenceId::new(3),
            horizon: SequenceId::new(10),
        };
        let msg = format!("{err}");
        assert!(msg.contains("partition-0"));
        assert!(msg.contains("expired"));
        assert_eq!(err.kind(), ErrorKind::DataExpired);
    }

    #[test]
    fn test_only_throttle_is_transient() {
        let throttled = PartitionError::Throttled {
            partition_id: PartitionId::new(1),
            retry_after: Duration::from_millis(5),
        };
        let unknown = PartitionError::UnknownPartition {
            partition_id: PartitionId::new(9),
            partition_count: 4,
        };
        assert!(throttled.is_transient());
        assert!(!unknown.is_transient());
        assert_eq!(unknown.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_from_core_limit_error() {
        let err: PartitionError = relay_core::Error::LimitExceeded {
            limit: "payload_bytes",
            max: 4,
            actual: 8,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("payload_bytes"));
    }
}
