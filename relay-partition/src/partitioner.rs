//! Key to partition assignment.
//!
//! Keys are hashed with xxHash and the 32-bit hash is scaled onto the
//! partition range, so every partition owns an equal slice of hash space.

use relay_core::PartitionId;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{PartitionError, PartitionResult};

/// Hashes a key to a 32-bit routing hash.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn hash_key(key: &[u8]) -> u32 {
    // Upper bits are better distributed.
    (xxh3_64(key) >> 32) as u32
}

/// Assigns `key` to one of `partition_count` partitions.
///
/// The same key always maps to the same partition for a fixed count.
///
/// # Errors
/// Returns `InvalidArgument` if `partition_count` is zero.
pub fn assign(key: &[u8], partition_count: u32) -> PartitionResult<PartitionId> {
    if partition_count == 0 {
        return Err(PartitionError::InvalidArgument {
            name: "partition_count",
            reason: "must be positive".to_string(),
        });
    }

    let scaled = (u64::from(hash_key(key)) * u64::from(partition_count)) >> 32;
    debug_assert!(scaled < u64::from(partition_count));
    Ok(PartitionId::new(scaled))
}
