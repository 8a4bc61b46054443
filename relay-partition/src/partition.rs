//! Partition management.
//!
//! A partition is a totally ordered, append-only sequence of records backed
//! by one or more segments. The last segment is the active one; every other
//! segment is sealed.

use std::time::Duration;

use bytes::Bytes;
use relay_core::{PartitionId, Record, SequenceId, Timestamp};
use tracing::debug;

use crate::error::{PartitionError, PartitionResult};
use crate::segment::{Segment, SegmentConfig};

/// How long records are kept.
///
/// Retention drops whole sealed segments. Either bound may be disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Records older than this are purged.
    pub max_age: Option<Duration>,
    /// Oldest segments are purged while the partition exceeds this size.
    pub max_bytes: Option<u64>,
}

impl RetentionPolicy {
    /// Keeps everything.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_age: None,
            max_bytes: None,
        }
    }

    /// Sets the age bound.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Sets the size bound.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

/// Partition metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMetadata {
    /// Partition ID.
    pub partition_id: PartitionId,
    /// First retained sequence id (the purge horizon).
    pub log_start: SequenceId,
    /// Next sequence id to be assigned.
    pub log_end: SequenceId,
    /// Number of segments.
    pub segment_count: u32,
    /// Total encoded size in bytes.
    pub size_bytes: u64,
}

impl PartitionMetadata {
    /// Number of records currently retained.
    #[must_use]
    pub const fn record_count(&self) -> u64 {
        self.log_end.get() - self.log_start.get()
    }
}

/// A partition containing records.
#[derive(Debug)]
pub struct Partition {
    partition_id: PartitionId,
    segment_config: SegmentConfig,
    /// Segments ordered by base sequence. Never empty; the last is active.
    segments: Vec<Segment>,
}

impl Partition {
    /// Creates an empty partition.
    #[must_use]
    pub fn new(partition_id: PartitionId, segment_config: SegmentConfig, now: Timestamp) -> Self {
        Self {
            partition_id,
            segment_config,
            segments: vec![Segment::new(SequenceId::earliest(), segment_config, now)],
        }
    }

    /// Returns the partition ID.
    #[must_use]
    pub const fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Returns the first retained sequence id.
    #[must_use]
    pub fn log_start(&self) -> SequenceId {
        self.segments
            .first()
            .map_or(SequenceId::earliest(), Segment::base_sequence)
    }

    /// Returns the next sequence id to be assigned.
    #[must_use]
    pub fn log_end(&self) -> SequenceId {
        self.segments
            .last()
            .map_or(SequenceId::earliest(), Segment::next_sequence)
    }

    /// Returns partition metadata.
    #[must_use]
    pub fn metadata(&self) -> PartitionMetadata {
        // Segment count is bounded by retention and fits in u32.
        #[allow(clippy::cast_possible_truncation)]
        let segment_count = self.segments.len() as u32;

        PartitionMetadata {
            partition_id: self.partition_id,
            log_start: self.log_start(),
            log_end: self.log_end(),
            segment_count,
            size_bytes: self.segments.iter().map(Segment::size_bytes).sum(),
        }
    }

    /// Appends `entries` atomically, stamping them with `now`.
    ///
    /// Returns the sequence id of the first record. An empty batch appends
    /// nothing and returns the current log end.
    ///
    /// # Errors
    /// Returns `SegmentFull` only if a freshly rolled segment refuses the
    /// batch, which cannot happen for an empty segment.
    pub fn append(
        &mut self,
        entries: &[(Bytes, Bytes)],
        now: Timestamp,
    ) -> PartitionResult<SequenceId> {
        if entries.is_empty() {
            return Ok(self.log_end());
        }

        let prev_end = self.log_end();
        let active = self.active();
        if active.should_roll(now)
            || !active.has_space_for(Segment::frame_size(entries), entries.len() as u64)
        {
            self.roll(now);
        }

        let first = self.active_mut().append(entries, now)?;

        debug_assert_eq!(first, prev_end);
        debug_assert_eq!(
            self.log_end().get(),
            prev_end.get() + entries.len() as u64
        );
        Ok(first)
    }

    /// Reads up to `max_records` records starting at `start`.
    ///
    /// Returns an empty list if `start` is at or beyond the tail.
    ///
    /// # Errors
    /// Returns `DataExpired` if `start` is below the purge horizon, or
    /// `Corruption` if stored data fails its integrity check.
    pub fn read(&self, start: SequenceId, max_records: usize) -> PartitionResult<Vec<Record>> {
        let log_start = self.log_start();
        if start < log_start {
            return Err(PartitionError::DataExpired {
                partition_id: self.partition_id,
                requested: start,
                horizon: log_start,
            });
        }
        if start >= self.log_end() || max_records == 0 {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut next = start;
        for segment in &self.segments[self.find_segment(start)..] {
            if records.len() >= max_records {
                break;
            }
            let chunk = segment.read(next, max_records - records.len())?;
            if let Some(last) = chunk.last() {
                next = last.sequence_id.next();
            }
            records.extend(chunk);
        }

        debug_assert!(records.len() <= max_records);
        Ok(records)
    }

    /// Drops sealed segments that fall outside `policy`.
    ///
    /// A non-empty active segment whose newest record has aged out is rolled
    /// first so it can be dropped too. Returns the number of records purged.
    pub fn enforce_retention(&mut self, policy: &RetentionPolicy, now: Timestamp) -> u64 {
        let mut purged = 0;

        if let Some(max_age) = policy.max_age {
            let expired = |segment: &Segment| {
                segment.newest_enqueue_time().is_some_and(|newest| {
                    u128::from(now.millis_since(newest)) >= max_age.as_millis()
                })
            };

            if expired(self.active()) {
                self.roll(now);
            }
            while self.segments.len() > 1 && expired(&self.segments[0]) {
                purged += self.drop_oldest();
            }
        }

        if let Some(max_bytes) = policy.max_bytes {
            while self.segments.len() > 1 && self.metadata().size_bytes > max_bytes {
                purged += self.drop_oldest();
            }
        }

        if purged > 0 {
            debug!(
                partition = %self.partition_id,
                purged,
                log_start = %self.log_start(),
                "Retention purged records"
            );
        }
        purged
    }

    /// Drops every segment that lies wholly below `sequence`.
    ///
    /// Segments straddling `sequence` are kept, so the new log start may be
    /// lower than `sequence`. Returns the number of records purged.
    pub fn purge_before(&mut self, sequence: SequenceId, now: Timestamp) -> u64 {
        if !self.active().is_empty() && self.active().next_sequence() <= sequence {
            self.roll(now);
        }

        let mut purged = 0;
        while self.segments.len() > 1 && self.segments[0].next_sequence() <= sequence {
            purged += self.drop_oldest();
        }
        purged
    }

    fn active(&self) -> &Segment {
        // Invariant: segments is never empty.
        &self.segments[self.segments.len() - 1]
    }

    fn active_mut(&mut self) -> &mut Segment {
        let idx = self.segments.len() - 1;
        &mut self.segments[idx]
    }

    /// Seals the active segment and opens a new one at the log end.
    fn roll(&mut self, now: Timestamp) {
        let next = self.log_end();
        self.active_mut().seal();
        self.segments
            .push(Segment::new(next, self.segment_config, now));

        debug_assert!(self.segments[self.segments.len() - 2].is_sealed());
    }

    /// Removes the oldest segment, returning its record count.
    fn drop_oldest(&mut self) -> u64 {
        debug_assert!(self.segments.len() > 1);
        debug_assert!(self.segments[0].is_sealed());
        self.segments.remove(0).record_count()
    }

    /// Finds the index of the segment containing `sequence`.
    fn find_segment(&self, sequence: SequenceId) -> usize {
        self.segments
            .partition_point(|s| s.next_sequence() <= sequence)
            .min(self.segments.len() - 1)
    }
}
