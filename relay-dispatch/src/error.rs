//! Dispatcher error types.

use std::time::Duration;

use relay_core::{ErrorKind, PartitionId, SequenceId};
use relay_partition::PartitionError;
use relay_progress::ProgressError;
use thiserror::Error;

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors raised while dispatching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The handler reported a failure.
    #[error("handler failed: {message}")]
    Handler {
        /// Handler-supplied description.
        message: String,
    },

    /// The handler did not finish before its deadline.
    #[error("handler timed out after {timeout:?}")]
    HandlerTimeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// A log store operation failed.
    #[error("log: {0}")]
    Log(#[from] PartitionError),

    /// A checkpoint store operation failed.
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] ProgressError),

    /// Writing to the dead-letter sink failed.
    #[error("dead-letter sink: {message}")]
    DeadLetter {
        /// Error message.
        message: String,
    },

    /// The batch exhausted its handler retries and was dead-lettered.
    #[error("{partition_id}: batch {first}..={last} dead-lettered after {attempts} attempts")]
    DeadLettered {
        /// Partition of the batch.
        partition_id: PartitionId,
        /// First sequence id of the batch.
        first: SequenceId,
        /// Last sequence id of the batch.
        last: SequenceId,
        /// Handler attempts made.
        attempts: u32,
    },

    /// Another worker already owns the partition.
    #[error("{partition_id} already has a running worker")]
    PartitionOwned {
        /// The contested partition.
        partition_id: PartitionId,
    },

    /// Invalid dispatcher configuration.
    #[error("invalid config '{name}': {reason}")]
    InvalidConfig {
        /// The offending field.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl DispatchError {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Handler { .. } | Self::HandlerTimeout { .. } | Self::DeadLettered { .. } => {
                ErrorKind::HandlerFailure
            }
            Self::Log(err) => err.kind(),
            Self::Checkpoint(err) => err.kind(),
            Self::DeadLetter { .. } => ErrorKind::Io,
            Self::PartitionOwned { .. } => ErrorKind::InvalidState,
            Self::InvalidConfig { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let timeout = DispatchError::HandlerTimeout {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(timeout.kind(), ErrorKind::HandlerFailure);

        let expired: DispatchError = PartitionError::DataExpired {
            partition_id: PartitionId::new(0),
            requested: SequenceId::new(0),
            horizon: SequenceId::new(4),
        }
        .into();
        assert_eq!(expired.kind(), ErrorKind::DataExpired);

        let commit: DispatchError = ProgressError::Io {
            operation: "commit",
            message: "disk".into(),
        }
        .into();
        assert!(commit.is_transient());

        let owned = DispatchError::PartitionOwned {
            partition_id: PartitionId::new(1),
        };
        assert_eq!(owned.kind(), ErrorKind::InvalidState);
        assert!(owned.to_string().contains("partition-1"));
    }
}
