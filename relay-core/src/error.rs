//! Error taxonomy for Relay.
//!
//! Every failure in Relay belongs to exactly one [`ErrorKind`]. Component
//! crates define their own error enums and expose `kind()` so that retry
//! decisions and edge mappings (HTTP status codes) are made on the kind,
//! never on message text.

use std::fmt;

use thiserror::Error;

/// The result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of every failure Relay can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller error. Never retried.
    InvalidArgument,
    /// Transient overload of the log. Retried with backoff.
    Throttled,
    /// The requested records were purged by retention. The reader must
    /// re-sync from the new log start.
    DataExpired,
    /// The target resource does not exist or is in the wrong state.
    InvalidState,
    /// Producer retries were exhausted.
    DeliveryFailed,
    /// A consumer handler failed or timed out.
    HandlerFailure,
    /// A storage I/O operation failed. Treated as transient.
    Io,
    /// Stored data failed an integrity check.
    Corruption,
}

impl ErrorKind {
    /// Returns true if an operation failing with this kind may succeed when
    /// retried unchanged.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Throttled | Self::Io)
    }

    /// Returns a stable, lowercase name for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Throttled => "throttled",
            Self::DataExpired => "data_expired",
            Self::InvalidState => "invalid_state",
            Self::DeliveryFailed => "delivery_failed",
            Self::HandlerFailure => "handler_failure",
            Self::Io => "io",
            Self::Corruption => "corruption",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by core validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An invalid argument was provided.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// A resource limit was exceeded.
    #[error("limit exceeded: {limit} (max={max}, actual={actual})")]
    LimitExceeded {
        /// Which limit was exceeded.
        limit: &'static str,
        /// The maximum allowed value.
        max: u64,
        /// The actual value that exceeded the limit.
        actual: u64,
    },
}

impl Error {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::LimitExceeded { .. } => ErrorKind::InvalidArgument,
        }
    }
}
