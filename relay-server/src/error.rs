//! Server error types.

use relay_core::ErrorKind;
use relay_dispatch::DispatchError;
use relay_partition::PartitionError;
use relay_progress::ProgressError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A request or name failed validation.
    #[error(transparent)]
    Core(#[from] relay_core::Error),

    /// A log or producer operation failed.
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// A checkpoint operation failed.
    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// The dispatcher could not be built or started.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Malformed request.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong.
        message: String,
    },

    /// Invalid or unreadable configuration.
    #[error("config: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// Socket or file error outside the stores.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(err) => err.kind(),
            Self::Partition(err) => err.kind(),
            Self::Progress(err) => err.kind(),
            Self::Dispatch(err) => err.kind(),
            Self::InvalidRequest { .. } | Self::Config { .. } => ErrorKind::InvalidArgument,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
