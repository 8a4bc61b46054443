//! Record types for Relay.
//!
//! Records are the fundamental unit of data in Relay. A record is created by
//! the producer, appended exactly once to a partition, and never mutated
//! afterwards. It is logically destroyed only by retention.
//!
//! # Record Format
//!
//! Each record contains:
//! - **Sequence id**: Position in the partition log (assigned on append)
//! - **Enqueue time**: When the log accepted the record
//! - **Partition key**: The key the producer routed the record by
//! - **Payload**: The opaque message bytes

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Timestamp type for records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the current time as a timestamp.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Timestamps won't overflow i64 for centuries.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Returns the number of milliseconds elapsed between `earlier` and `self`,
    /// or zero if `earlier` is later.
    #[must_use]
    #[allow(clippy::cast_sign_loss)] // Checked to be positive.
    pub const fn millis_since(self, earlier: Self) -> u64 {
        if self.0 > earlier.0 {
            (self.0 - earlier.0) as u64
        } else {
            0
        }
    }
}

/// Position of a record in its partition.
///
/// Sequence ids start at zero and are strictly increasing within a partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceId(u64);

impl SequenceId {
    /// Creates a sequence id from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next sequence id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the sequence id `count` positions after this one.
    #[must_use]
    pub const fn advance(self, count: u64) -> Self {
        Self(self.0.saturating_add(count))
    }

    /// Returns the first sequence id of any partition.
    #[must_use]
    pub const fn earliest() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed part of an encoded record: sequence + timestamp + key len + payload len.
const RECORD_HEADER_SIZE: usize = 8 + 8 + 4 + 4;

/// A single record in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key the producer routed this record by.
    pub partition_key: Bytes,
    /// The record payload.
    pub payload: Bytes,
    /// Position in the partition (assigned on append).
    pub sequence_id: SequenceId,
    /// When the log accepted the record.
    pub enqueue_time: Timestamp,
}

impl Record {
    /// Creates a record that has not been appended yet.
    #[must_use]
    pub fn new(partition_key: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            partition_key: partition_key.into(),
            payload: payload.into(),
            sequence_id: SequenceId::default(),
            enqueue_time: Timestamp::default(),
        }
    }

    /// Returns the encoded size of the record in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.partition_key.len() + self.payload.len()
    }

    /// Encodes the record to bytes.
    #[allow(clippy::cast_possible_truncation)] // Sizes bounded by limits.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.sequence_id.get());
        buf.put_i64_le(self.enqueue_time.as_millis());
        buf.put_u32_le(self.partition_key.len() as u32);
        buf.put_slice(&self.partition_key);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Decodes a record from bytes.
    ///
    /// Returns `None` if the buffer is truncated.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 8 + 8 + 4 {
            return None;
        }

        let sequence_id = SequenceId::new(buf.get_u64_le());
        let enqueue_time = Timestamp::from_millis(buf.get_i64_le());

        let key_len = buf.get_u32_le() as usize;
        if buf.remaining() < key_len + 4 {
            return None;
        }
        let partition_key = buf.copy_to_bytes(key_len);

        let payload_len = buf.get_u32_le() as usize;
        if buf.remaining() < payload_len {
            return None;
        }
        let payload = buf.copy_to_bytes(payload_len);

        Some(Self {
            partition_key,
            payload,
            sequence_id,
            enqueue_time,
        })
    }
}
