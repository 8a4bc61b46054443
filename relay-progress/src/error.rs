//! Checkpoint error types.

use relay_core::ErrorKind;
use thiserror::Error;

/// Result type for checkpoint operations.
pub type ProgressResult<T> = Result<T, ProgressError>;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgressError {
    /// I/O error during a storage operation.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// Stored checkpoints could not be decoded.
    #[error("corrupt checkpoint file: {message}")]
    Corruption {
        /// Description of the problem.
        message: String,
    },
}

impl ProgressError {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Corruption { .. } => ErrorKind::Corruption,
        }
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    pub(crate) fn io(operation: &'static str, err: &std::io::Error) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }
}
