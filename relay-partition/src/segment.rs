//! Log segment management.
//!
//! A segment is a contiguous run of one partition's log. The active segment
//! accepts appends; once rolled it is sealed and only ever read or dropped
//! whole by retention.
//!
//! # Frame Format
//!
//! Each append writes one frame:
//!
//! ```text
//! [base_sequence: u64][record_count: u32][crc32: u32][record]...
//! ```
//!
//! The CRC covers the encoded records of the frame.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use relay_core::{Record, SequenceId, Timestamp};

use crate::error::{PartitionError, PartitionResult};

/// Frame header: base sequence + record count + CRC.
const FRAME_HEADER_SIZE: usize = 8 + 4 + 4;

/// Configuration for log segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Maximum size of a segment in bytes.
    pub max_size_bytes: u64,
    /// Maximum number of records in a segment.
    pub max_records: u64,
    /// Age after which a non-empty active segment is rolled on the next append.
    pub max_age: Duration,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024, // 64 MB
            max_records: 1_000_000,
            max_age: Duration::from_secs(60 * 60),
        }
    }
}

impl SegmentConfig {
    /// Small segments so tests roll and purge quickly.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_size_bytes: 64 * 1024,
            max_records: 4,
            max_age: Duration::from_secs(60),
        }
    }

    /// Sets the record cap.
    #[must_use]
    pub const fn with_max_records(mut self, max_records: u64) -> Self {
        self.max_records = max_records;
        self
    }

    /// Sets the byte cap.
    #[must_use]
    pub const fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Sets the roll age.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

/// Index entry for fast sequence lookups.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    /// First sequence of the indexed frame.
    sequence: SequenceId,
    /// Byte position of the frame in the segment data.
    position: usize,
}

/// A single log segment containing records.
#[derive(Debug)]
pub struct Segment {
    /// First sequence id in this segment.
    base_sequence: SequenceId,
    /// Next sequence id to be assigned.
    next_sequence: SequenceId,
    config: SegmentConfig,
    /// Encoded frames.
    data: BytesMut,
    /// Sparse index over frame starts.
    index: Vec<IndexEntry>,
    /// Create an index entry every N records.
    index_interval: u64,
    records_since_index: u64,
    /// When the segment was opened.
    created_at: Timestamp,
    /// Enqueue time of the newest record.
    newest_enqueue_time: Option<Timestamp>,
    sealed: bool,
}

impl Segment {
    /// Creates an empty segment starting at `base_sequence`.
    #[must_use]
    pub fn new(base_sequence: SequenceId, config: SegmentConfig, created_at: Timestamp) -> Self {
        Self {
            base_sequence,
            next_sequence: base_sequence,
            config,
            data: BytesMut::new(),
            index: Vec::new(),
            index_interval: 1024,
            records_since_index: 0,
            created_at,
            newest_enqueue_time: None,
            sealed: false,
        }
    }

    /// Returns the first sequence id of this segment.
    #[must_use]
    pub const fn base_sequence(&self) -> SequenceId {
        self.base_sequence
    }

    /// Returns the next sequence id that will be assigned.
    #[must_use]
    pub const fn next_sequence(&self) -> SequenceId {
        self.next_sequence
    }

    /// Returns the number of records in this segment.
    #[must_use]
    pub const fn record_count(&self) -> u64 {
        self.next_sequence.get() - self.base_sequence.get()
    }

    /// Returns true if the segment holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Returns the size of the segment data in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns true if the segment is sealed (read-only).
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns the enqueue time of the newest record, if any.
    #[must_use]
    pub const fn newest_enqueue_time(&self) -> Option<Timestamp> {
        self.newest_enqueue_time
    }

    /// Returns true if the segment is old enough to roll at `now`.
    #[must_use]
    pub fn should_roll(&self, now: Timestamp) -> bool {
        !self.is_empty()
            && u128::from(now.millis_since(self.created_at)) >= self.config.max_age.as_millis()
    }

    /// Returns true if the segment can take `bytes` more data and
    /// `record_count` more records.
    ///
    /// An empty open segment accepts any batch so oversized batches still
    /// land somewhere.
    #[must_use]
    pub fn has_space_for(&self, bytes: usize, record_count: u64) -> bool {
        if self.sealed {
            return false;
        }
        if self.is_empty() {
            return true;
        }

        let new_size = self.size_bytes() + bytes as u64;
        let new_count = self.record_count() + record_count;
        new_size <= self.config.max_size_bytes && new_count <= self.config.max_records
    }

    /// Returns the number of bytes a frame for `entries` will occupy.
    #[must_use]
    pub fn frame_size(entries: &[(Bytes, Bytes)]) -> usize {
        FRAME_HEADER_SIZE
            + entries
                .iter()
                .map(|(key, payload)| Record::new(key.clone(), payload.clone()).encoded_size())
                .sum::<usize>()
    }

    /// Appends `entries` as one frame, stamping each with a sequence id and
    /// `now` as the enqueue time.
    ///
    /// Returns the sequence id of the first record.
    ///
    /// # Errors
    /// Returns `SegmentFull` if the segment is sealed or out of space.
    pub fn append(
        &mut self,
        entries: &[(Bytes, Bytes)],
        now: Timestamp,
    ) -> PartitionResult<SequenceId> {
        if self.sealed {
            return Err(PartitionError::SegmentFull {
                reason: "segment is sealed",
            });
        }
        if !self.has_space_for(Self::frame_size(entries), entries.len() as u64) {
            return Err(PartitionError::SegmentFull {
                reason: "size or record limit reached",
            });
        }

        let first = self.next_sequence;
        if self.is_empty() || self.records_since_index >= self.index_interval {
            self.index.push(IndexEntry {
                sequence: first,
                position: self.data.len(),
            });
            self.records_since_index = 0;
        }

        self.encode_frame(first, entries, now);

        let count = entries.len() as u64;
        self.next_sequence = first.advance(count);
        self.records_since_index += count;
        if count > 0 {
            self.newest_enqueue_time = Some(now);
        }

        Ok(first)
    }

    #[allow(clippy::cast_possible_truncation)] // Batch sizes bounded by limits.
    fn encode_frame(&mut self, first: SequenceId, entries: &[(Bytes, Bytes)], now: Timestamp) {
        self.data.put_u64_le(first.get());
        self.data.put_u32_le(entries.len() as u32);

        let crc_pos = self.data.len();
        self.data.put_u32_le(0);

        let records_start = self.data.len();
        let mut sequence = first;
        for (key, payload) in entries {
            let record = Record {
                partition_key: key.clone(),
                payload: payload.clone(),
                sequence_id: sequence,
                enqueue_time: now,
            };
            record.encode(&mut self.data);
            sequence = sequence.next();
        }

        let crc = crc32fast::hash(&self.data[records_start..]);
        self.data[crc_pos..crc_pos + 4].copy_from_slice(&crc.to_le_bytes());
    }

    /// Reads up to `max_records` records starting at `start`.
    ///
    /// Returns an empty list if `start` is outside this segment.
    ///
    /// # Errors
    /// Returns `Corruption` if a frame fails to decode or its CRC mismatches.
    pub fn read(&self, start: SequenceId, max_records: usize) -> PartitionResult<Vec<Record>> {
        if start < self.base_sequence || start >= self.next_sequence || max_records == 0 {
            return Ok(Vec::new());
        }

        let position = self.find_position(start);
        let mut reader = SegmentReader::new(&self.data[position..]);
        let mut records = Vec::with_capacity(max_records.min(self.record_count() as usize));

        while records.len() < max_records {
            let Some(frame) = reader.next_frame()? else {
                break;
            };
            records.extend(
                frame
                    .into_iter()
                    .filter(|record| record.sequence_id >= start)
                    .take(max_records - records.len()),
            );
        }

        Ok(records)
    }

    /// Finds the byte position of the indexed frame at or before `sequence`.
    fn find_position(&self, sequence: SequenceId) -> usize {
        let idx = self.index.partition_point(|e| e.sequence <= sequence);
        if idx == 0 {
            0
        } else {
            self.index[idx - 1].position
        }
    }

    /// Seals the segment, preventing further writes.
    pub fn seal(&mut self) {
        self.sealed = true;
    }
}

/// Sequential frame reader over segment data.
pub struct SegmentReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SegmentReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Decodes the next frame, or `None` at end of data.
    ///
    /// # Errors
    /// Returns `Corruption` if the frame is truncated or fails its CRC.
    pub fn next_frame(&mut self) -> PartitionResult<Option<Vec<Record>>> {
        let remaining = &self.data[self.position..];
        if remaining.is_empty() {
            return Ok(None);
        }
        if remaining.len() < FRAME_HEADER_SIZE {
            return Err(PartitionError::Corruption {
                message: "incomplete frame header".to_string(),
            });
        }

        let mut buf = remaining;
        let base_sequence = SequenceId::new(buf.get_u64_le());
        let record_count = buf.get_u32_le() as usize;
        let expected_crc = buf.get_u32_le();

        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            let record = Record::decode(&mut buf).ok_or_else(|| PartitionError::Corruption {
                message: format!("truncated record in frame at {base_sequence}"),
            })?;
            records.push(record);
        }

        let frame_end = remaining.len() - buf.remaining();
        let actual_crc = crc32fast::hash(&remaining[FRAME_HEADER_SIZE..frame_end]);
        if actual_crc != expected_crc {
            return Err(PartitionError::Corruption {
                message: format!("CRC mismatch: expected {expected_crc:08x}, got {actual_crc:08x}"),
            });
        }

        self.position += frame_end;
        Ok(Some(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(prefix: &str, count: usize) -> Vec<(Bytes, Bytes)> {
        (0..count)
            .map(|i| {
                (
                    Bytes::from(format!("key-{i}")),
                    Bytes::from(format!("{prefix}-{i}")),
                )
            })
            .collect()
    }

    fn segment(base: u64) -> Segment {
        Segment::new(
            SequenceId::new(base),
            SegmentConfig::default(),
            Timestamp::from_millis(0),
        )
    }

    #[test]
    fn test_segment_creation() {
        let segment = segment(0);
        assert_eq!(segment.base_sequence(), SequenceId::new(0));
        assert_eq!(segment.next_sequence(), SequenceId::new(0));
        assert!(segment.is_empty());
        assert!(segment.newest_enqueue_time().is_none());
    }

    #[test]
    fn test_segment_append_assigns_contiguous_sequences() {
        let mut segment = segment(100);

        let first = segment
            .append(&entries("a", 2), Timestamp::from_millis(10))
            .unwrap();
        let second = segment
            .append(&entries("b", 3), Timestamp::from_millis(20))
            .unwrap();

        assert_eq!(first, SequenceId::new(100));
        assert_eq!(second, SequenceId::new(102));
        assert_eq!(segment.next_sequence(), SequenceId::new(105));
        assert_eq!(segment.record_count(), 5);
        assert_eq!(segment.newest_enqueue_time(), Some(Timestamp::from_millis(20)));
    }

    #[test]
    fn test_segment_sealed_rejects_append() {
        let mut segment = segment(0);
        segment.seal();

        let result = segment.append(&entries("a", 1), Timestamp::from_millis(0));
        assert!(matches!(result, Err(PartitionError::SegmentFull { .. })));
    }

    #[test]
    fn test_segment_record_cap() {
        let config = SegmentConfig::default().with_max_records(3);
        let mut segment = Segment::new(SequenceId::new(0), config, Timestamp::from_millis(0));

        segment.append(&entries("a", 2), Timestamp::from_millis(0)).unwrap();
        assert!(!segment.has_space_for(0, 2));
        assert!(segment.append(&entries("b", 2), Timestamp::from_millis(0)).is_err());
    }

    #[test]
    fn test_empty_segment_accepts_oversized_batch() {
        let config = SegmentConfig::default().with_max_records(2);
        let mut segment = Segment::new(SequenceId::new(0), config, Timestamp::from_millis(0));

        let first = segment
            .append(&entries("big", 5), Timestamp::from_millis(0))
            .unwrap();
        assert_eq!(first, SequenceId::new(0));
        assert_eq!(segment.record_count(), 5);
    }

    #[test]
    fn test_segment_read() {
        let mut segment = segment(0);
        segment.append(&entries("v", 5), Timestamp::from_millis(7)).unwrap();

        let records = segment.read(SequenceId::new(0), 10).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].sequence_id, SequenceId::new(0));
        assert_eq!(records[4].sequence_id, SequenceId::new(4));
        assert_eq!(records[2].payload, Bytes::from("v-2"));
        assert_eq!(records[2].partition_key, Bytes::from("key-2"));
        assert_eq!(records[2].enqueue_time, Timestamp::from_millis(7));
    }

    #[test]
    fn test_segment_read_across_frames() {
        let mut segment = segment(0);
        for i in 0..4 {
            segment
                .append(&entries(&format!("f{i}"), 3), Timestamp::from_millis(i))
                .unwrap();
        }

        let records = segment.read(SequenceId::new(4), 5).unwrap();
        let sequences: Vec<u64> = records.iter().map(|r| r.sequence_id.get()).collect();
        assert_eq!(sequences, vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_segment_read_outside_range_is_empty() {
        let mut segment = segment(10);
        segment.append(&entries("v", 5), Timestamp::from_millis(0)).unwrap();

        assert!(segment.read(SequenceId::new(5), 10).unwrap().is_empty());
        assert!(segment.read(SequenceId::new(15), 10).unwrap().is_empty());
    }

    #[test]
    fn test_should_roll_by_age() {
        let config = SegmentConfig::default().with_max_age(Duration::from_secs(1));
        let mut segment = Segment::new(SequenceId::new(0), config, Timestamp::from_millis(1_000));

        assert!(!segment.should_roll(Timestamp::from_millis(5_000)), "empty never rolls");
        segment.append(&entries("v", 1), Timestamp::from_millis(1_000)).unwrap();
        assert!(!segment.should_roll(Timestamp::from_millis(1_500)));
        assert!(segment.should_roll(Timestamp::from_millis(2_000)));
    }

    #[test]
    fn test_reader_detects_corruption() {
        let mut segment = segment(0);
        segment.append(&entries("v", 2), Timestamp::from_millis(0)).unwrap();

        let mut data = segment.data.to_vec();
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let mut reader = SegmentReader::new(&data);
        assert!(matches!(
            reader.next_frame(),
            Err(PartitionError::Corruption { .. })
        ));
    }
}
