//! Strongly-typed identifiers for Relay entities.
//!
//! Explicit types prevent bugs from mixing up IDs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `PartitionId` with a raw counter)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

define_id!(
    PartitionId,
    "partition",
    "Identifier of a partition within the stream, in `[0, partition_count)`."
);

impl PartitionId {
    /// Returns the partition id as an index into a partition table.
    ///
    /// Partition counts are bounded by [`crate::Limits::max_partitions`], so the
    /// conversion never truncates in practice.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Maximum length of a consumer group name in bytes.
pub const CONSUMER_GROUP_NAME_BYTES_MAX: usize = 255;

/// Name of a consumer group.
///
/// Checkpoints are tracked per `(ConsumerGroup, PartitionId)`. Names are
/// non-empty, at most [`CONSUMER_GROUP_NAME_BYTES_MAX`] bytes, and contain no
/// `/` so they can appear as a single URL path segment.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConsumerGroup(String);

impl ConsumerGroup {
    /// Creates a validated consumer group name.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the name is empty, too long, or contains `/`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument {
                name: "consumer_group",
                reason: "must not be empty",
            });
        }
        if name.len() > CONSUMER_GROUP_NAME_BYTES_MAX {
            return Err(Error::InvalidArgument {
                name: "consumer_group",
                reason: "must be at most 255 bytes",
            });
        }
        if name.contains('/') {
            return Err(Error::InvalidArgument {
                name: "consumer_group",
                reason: "must not contain '/'",
            });
        }
        Ok(Self(name))
    }

    /// Returns the group name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConsumerGroup {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ConsumerGroup> for String {
    fn from(group: ConsumerGroup) -> Self {
        group.0
    }
}

impl fmt::Debug for ConsumerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group({})", self.0)
    }
}

impl fmt::Display for ConsumerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
