//! The partitioned log store.
//!
//! `LogStore` owns a fixed set of partitions. Each partition has its own
//! lock, so appends to different partitions never contend, and an optional
//! token bucket that throttles appends when a partition runs hot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use relay_core::{Limits, PartitionId, Record, SequenceId, Timestamp};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{PartitionError, PartitionResult};
use crate::partition::{Partition, PartitionMetadata, RetentionPolicy};
use crate::segment::SegmentConfig;
use crate::throttle::{Refusal, TokenBucket, TokenBucketConfig};

/// Default number of records a cursor fetches per read.
pub const CURSOR_CHUNK_RECORDS_DEFAULT: u32 = 256;

/// Configuration for a log store.
#[derive(Debug, Clone, PartialEq)]
pub struct LogStoreConfig {
    /// Number of partitions. Fixed for the life of the store.
    pub partition_count: u32,
    /// Segment sizing.
    pub segment: SegmentConfig,
    /// Retention applied by `enforce_retention`.
    pub retention: RetentionPolicy,
    /// Per-partition append rate limit, in records.
    pub throttle: Option<TokenBucketConfig>,
    /// Record and batch limits.
    pub limits: Limits,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            partition_count: 4,
            segment: SegmentConfig::default(),
            retention: RetentionPolicy::unbounded().with_max_age(Duration::from_secs(24 * 60 * 60)),
            throttle: None,
            limits: Limits::default(),
        }
    }
}

impl LogStoreConfig {
    /// Creates a configuration with `partition_count` partitions.
    #[must_use]
    pub fn new(partition_count: u32) -> Self {
        Self {
            partition_count,
            ..Self::default()
        }
    }

    /// Small segments and no retention, for tests.
    #[must_use]
    pub fn for_testing(partition_count: u32) -> Self {
        Self {
            partition_count,
            segment: SegmentConfig::for_testing(),
            retention: RetentionPolicy::unbounded(),
            throttle: None,
            limits: Limits::default(),
        }
    }

    /// Sets the segment configuration.
    #[must_use]
    pub const fn with_segment(mut self, segment: SegmentConfig) -> Self {
        self.segment = segment;
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Enables per-partition throttling.
    #[must_use]
    pub const fn with_throttle(mut self, throttle: TokenBucketConfig) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Sets the record limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Largest number of records one append can be admitted with: the
    /// batch limit, further capped by the throttle's bucket capacity.
    #[must_use]
    pub fn max_append_records(&self) -> u32 {
        let limit = self.limits.max_batch_records;
        self.throttle.map_or(limit, |throttle| {
            u32::try_from(throttle.capacity).map_or(limit, |capacity| capacity.min(limit))
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `InvalidArgument` or `InvalidConfig` describing the first
    /// problem found.
    pub fn validate(&self) -> PartitionResult<()> {
        self.limits.validate()?;

        if self.partition_count == 0 {
            return Err(PartitionError::InvalidArgument {
                name: "partition_count",
                reason: "must be positive".to_string(),
            });
        }
        if self.partition_count > self.limits.max_partitions {
            return Err(PartitionError::InvalidArgument {
                name: "partition_count",
                reason: format!("exceeds limit {}", self.limits.max_partitions),
            });
        }
        if self.segment.max_records == 0 || self.segment.max_size_bytes == 0 {
            return Err(PartitionError::InvalidConfig {
                message: "segment caps must be positive".to_string(),
            });
        }
        if let Some(throttle) = &self.throttle {
            if throttle.capacity == 0 || throttle.refill_rate == 0 {
                return Err(PartitionError::InvalidConfig {
                    message: "throttle capacity and refill rate must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Fault injection for the log store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogFaultConfig {
    /// The next N appends fail with `Throttled` regardless of load.
    pub throttle_next: u32,
    /// Wait hint reported by injected throttles.
    pub throttle_retry_after: Duration,
}

impl LogFaultConfig {
    /// No faults.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            throttle_next: 0,
            throttle_retry_after: Duration::ZERO,
        }
    }

    /// Throttles the next `count` appends.
    #[must_use]
    pub const fn throttling(count: u32) -> Self {
        Self {
            throttle_next: count,
            throttle_retry_after: Duration::from_millis(1),
        }
    }
}

#[derive(Debug)]
struct PartitionSlot {
    log: Mutex<Partition>,
    bucket: Option<Mutex<TokenBucket>>,
}

/// A fixed set of partitions.
#[derive(Debug)]
pub struct LogStore {
    config: LogStoreConfig,
    partitions: Vec<PartitionSlot>,
    faults: Mutex<LogFaultConfig>,
    /// Clock origin for throttling.
    epoch: Instant,
}

impl LogStore {
    /// Creates a store with empty partitions.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: LogStoreConfig) -> PartitionResult<Self> {
        config.validate()?;

        let now = Timestamp::now();
        let partitions = (0..config.partition_count)
            .map(|id| PartitionSlot {
                log: Mutex::new(Partition::new(
                    PartitionId::new(u64::from(id)),
                    config.segment,
                    now,
                )),
                bucket: config
                    .throttle
                    .as_ref()
                    .map(|throttle| Mutex::new(TokenBucket::new(throttle, 0))),
            })
            .collect();

        info!(
            partitions = config.partition_count,
            throttled = config.throttle.is_some(),
            "Log store created"
        );

        Ok(Self {
            config,
            partitions,
            faults: Mutex::new(LogFaultConfig::none()),
            epoch: Instant::now(),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &LogStoreConfig {
        &self.config
    }

    /// Returns the number of partitions.
    #[must_use]
    pub const fn partition_count(&self) -> u32 {
        self.config.partition_count
    }

    /// Returns all partition ids.
    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> {
        (0..u64::from(self.config.partition_count)).map(PartitionId::new)
    }

    /// Returns the fault configuration for modification.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    pub fn fault_config(&self) -> MutexGuard<'_, LogFaultConfig> {
        self.faults.lock().expect("fault config lock poisoned")
    }

    /// Appends one record. Returns its sequence id.
    ///
    /// # Errors
    /// See [`LogStore::append_batch`].
    pub fn append(
        &self,
        partition_id: PartitionId,
        partition_key: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> PartitionResult<SequenceId> {
        self.append_batch(partition_id, &[(partition_key.into(), payload.into())])
    }

    /// Appends `entries` to one partition atomically, with contiguous
    /// sequence ids. Returns the sequence id of the first record.
    ///
    /// # Errors
    /// - `UnknownPartition` if the partition does not exist
    /// - `InvalidArgument` if the batch is empty or breaks a limit
    /// - `Throttled` if the partition's append rate is exhausted
    pub fn append_batch(
        &self,
        partition_id: PartitionId,
        entries: &[(Bytes, Bytes)],
    ) -> PartitionResult<SequenceId> {
        self.append_batch_at(partition_id, entries, Timestamp::now())
    }

    /// Appends `entries` stamped with an explicit enqueue time.
    ///
    /// # Errors
    /// See [`LogStore::append_batch`].
    pub fn append_batch_at(
        &self,
        partition_id: PartitionId,
        entries: &[(Bytes, Bytes)],
        now: Timestamp,
    ) -> PartitionResult<SequenceId> {
        let slot = self.slot(partition_id)?;
        self.check_batch(entries)?;
        self.admit(partition_id, slot, entries.len() as u64)?;

        let mut log = slot.log.lock().expect("partition lock poisoned");
        let first = log.append(entries, now)?;
        debug!(
            partition = %partition_id,
            first = %first,
            count = entries.len(),
            "Appended records"
        );
        Ok(first)
    }

    /// Reads up to `max_count` records starting at `from`.
    ///
    /// Returns fewer records when the tail is reached and an empty list when
    /// `from` is at or beyond the tail. `max_count` is capped at the batch
    /// limit.
    ///
    /// # Errors
    /// - `UnknownPartition` if the partition does not exist
    /// - `InvalidArgument` if `max_count` is zero
    /// - `DataExpired` if `from` is below the purge horizon
    pub fn read(
        &self,
        partition_id: PartitionId,
        from: SequenceId,
        max_count: u32,
    ) -> PartitionResult<Vec<Record>> {
        let slot = self.slot(partition_id)?;
        if max_count == 0 {
            return Err(PartitionError::InvalidArgument {
                name: "max_count",
                reason: "must be positive".to_string(),
            });
        }

        let max = max_count.min(self.config.limits.max_batch_records) as usize;
        let log = slot.log.lock().expect("partition lock poisoned");
        log.read(from, max)
    }

    /// Returns a lazy cursor over a partition starting at `from`.
    ///
    /// # Errors
    /// Returns `UnknownPartition` if the partition does not exist.
    pub fn cursor(
        self: &Arc<Self>,
        partition_id: PartitionId,
        from: SequenceId,
    ) -> PartitionResult<RecordCursor> {
        self.slot(partition_id)?;
        Ok(RecordCursor {
            store: Arc::clone(self),
            partition_id,
            position: from,
            chunk_records: CURSOR_CHUNK_RECORDS_DEFAULT,
            buffer: VecDeque::new(),
        })
    }

    /// Returns metadata for a partition.
    ///
    /// # Errors
    /// Returns `UnknownPartition` if the partition does not exist.
    pub fn metadata(&self, partition_id: PartitionId) -> PartitionResult<PartitionMetadata> {
        let slot = self.slot(partition_id)?;
        let log = slot.log.lock().expect("partition lock poisoned");
        Ok(log.metadata())
    }

    /// Applies the configured retention policy to every partition.
    /// Returns the number of records purged.
    pub fn enforce_retention(&self) -> u64 {
        self.enforce_retention_at(Timestamp::now())
    }

    /// Applies retention as of `now`. Returns the number of records purged.
    pub fn enforce_retention_at(&self, now: Timestamp) -> u64 {
        let policy = self.config.retention;
        self.partitions
            .iter()
            .map(|slot| {
                slot.log
                    .lock()
                    .expect("partition lock poisoned")
                    .enforce_retention(&policy, now)
            })
            .sum()
    }

    /// Drops every segment of a partition lying wholly below `sequence`.
    /// Returns the number of records purged.
    ///
    /// # Errors
    /// Returns `UnknownPartition` if the partition does not exist.
    pub fn purge_before(
        &self,
        partition_id: PartitionId,
        sequence: SequenceId,
    ) -> PartitionResult<u64> {
        let slot = self.slot(partition_id)?;
        let mut log = slot.log.lock().expect("partition lock poisoned");
        let purged = log.purge_before(sequence, Timestamp::now());
        info!(
            partition = %partition_id,
            purged,
            log_start = %log.log_start(),
            "Purged records"
        );
        Ok(purged)
    }

    fn slot(&self, partition_id: PartitionId) -> PartitionResult<&PartitionSlot> {
        usize::try_from(partition_id.get())
            .ok()
            .and_then(|idx| self.partitions.get(idx))
            .ok_or(PartitionError::UnknownPartition {
                partition_id,
                partition_count: self.config.partition_count,
            })
    }

    fn check_batch(&self, entries: &[(Bytes, Bytes)]) -> PartitionResult<()> {
        let limits = &self.config.limits;
        if entries.is_empty() {
            return Err(PartitionError::InvalidArgument {
                name: "entries",
                reason: "batch must not be empty".to_string(),
            });
        }
        if entries.len() > limits.max_batch_records as usize {
            return Err(PartitionError::InvalidArgument {
                name: "entries",
                reason: format!(
                    "{} records exceeds batch limit {}",
                    entries.len(),
                    limits.max_batch_records
                ),
            });
        }
        for (key, payload) in entries {
            limits.check_record(key, payload)?;
        }
        Ok(())
    }

    /// Applies injected faults and the token bucket.
    fn admit(
        &self,
        partition_id: PartitionId,
        slot: &PartitionSlot,
        records: u64,
    ) -> PartitionResult<()> {
        {
            let mut faults = self.fault_config();
            if faults.throttle_next > 0 {
                faults.throttle_next -= 1;
                return Err(PartitionError::Throttled {
                    partition_id,
                    retry_after: faults.throttle_retry_after,
                });
            }
        }

        let Some(bucket) = &slot.bucket else {
            return Ok(());
        };
        let now_us = u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX);
        let mut bucket = bucket.lock().expect("throttle lock poisoned");
        match bucket.try_acquire(records, now_us) {
            Ok(()) => Ok(()),
            Err(Refusal::RetryAfter(retry_after)) => Err(PartitionError::Throttled {
                partition_id,
                retry_after,
            }),
            Err(Refusal::ExceedsCapacity) => Err(PartitionError::InvalidArgument {
                name: "entries",
                reason: format!("{records} records exceeds the partition append capacity"),
            }),
        }
    }
}

/// A lazy, restartable sequence of records from one partition.
///
/// The cursor fetches records in chunks as it is iterated. When it reaches
/// the tail it yields `None`; iterating again later picks up any records
/// appended since. `position()` can be saved and fed back to
/// [`LogStore::cursor`] to resume.
#[derive(Debug)]
pub struct RecordCursor {
    store: Arc<LogStore>,
    partition_id: PartitionId,
    position: SequenceId,
    chunk_records: u32,
    buffer: VecDeque<Record>,
}

impl RecordCursor {
    /// Sets how many records are fetched per read.
    #[must_use]
    pub fn with_chunk_records(mut self, chunk_records: u32) -> Self {
        self.chunk_records = chunk_records.max(1);
        self
    }

    /// Returns the partition this cursor reads.
    #[must_use]
    pub const fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Returns the sequence id of the next record to be yielded.
    #[must_use]
    pub fn position(&self) -> SequenceId {
        self.buffer
            .front()
            .map_or(self.position, |record| record.sequence_id)
    }

    /// Moves the cursor to `sequence`, discarding buffered records.
    pub fn seek(&mut self, sequence: SequenceId) {
        self.buffer.clear();
        self.position = sequence;
    }

    fn fill(&mut self) -> PartitionResult<()> {
        let records = self
            .store
            .read(self.partition_id, self.position, self.chunk_records)?;
        if let Some(last) = records.last() {
            self.position = last.sequence_id.next();
        }
        self.buffer.extend(records);
        Ok(())
    }
}

impl Iterator for RecordCursor {
    type Item = PartitionResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(err) = self.fill() {
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(partitions: u32) -> LogStore {
        LogStore::new(LogStoreConfig::for_testing(partitions)).unwrap()
    }

    fn batch(payloads: &[&'static str]) -> Vec<(Bytes, Bytes)> {
        payloads
            .iter()
            .map(|p| (Bytes::from_static(b"key"), Bytes::from_static(p.as_bytes())))
            .collect()
    }

    #[test]
    fn test_append_a_then_b() {
        let store = store(1);
        let p0 = PartitionId::new(0);

        assert_eq!(store.append(p0, "k", "A").unwrap(), SequenceId::new(0));
        assert_eq!(store.append(p0, "k", "B").unwrap(), SequenceId::new(1));

        let records = store.read(p0, SequenceId::new(0), 10).unwrap();
        let view: Vec<(&[u8], u64)> = records
            .iter()
            .map(|r| (r.payload.as_ref(), r.sequence_id.get()))
            .collect();
        assert_eq!(view, vec![(&b"A"[..], 0), (&b"B"[..], 1)]);
    }

    #[test]
    fn test_max_append_records() {
        let config = LogStoreConfig::for_testing(1);
        assert_eq!(config.max_append_records(), config.limits.max_batch_records);

        let throttled = config.with_throttle(TokenBucketConfig::new(2, 1_000));
        assert_eq!(throttled.max_append_records(), 2);
    }

    #[test]
    fn test_concurrent_appends_keep_per_partition_order() {
        let store = store(1);
        let p0 = PartitionId::new(0);
        let (threads, per_thread) = (8_u64, 200_u64);

        let mut assigned: Vec<u64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|thread| {
                    let store = &store;
                    scope.spawn(move || {
                        (0..per_thread)
                            .map(|i| {
                                store
                                    .append(p0, "k", format!("{thread}:{i}"))
                                    .unwrap()
                                    .get()
                            })
                            .collect::<Vec<u64>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| {
                    let ids = handle.join().unwrap();
                    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
                    ids
                })
                .collect()
        });
        assigned.sort_unstable();
        assert_eq!(assigned, (0..threads * per_thread).collect::<Vec<_>>());

        let records = store.read(p0, SequenceId::new(0), 10_000).unwrap();
        assert_eq!(records.len() as u64, threads * per_thread);
        let mut last_seen = vec![None; threads as usize];
        for (expected, record) in records.iter().enumerate() {
            assert_eq!(record.sequence_id.get(), expected as u64);
            let text = std::str::from_utf8(&record.payload).unwrap();
            let (thread, i) = text.split_once(':').unwrap();
            let (thread, i): (usize, u64) = (thread.parse().unwrap(), i.parse().unwrap());
            // Each writer's records appear in the order it appended them.
            assert!(last_seen[thread] < Some(i));
            last_seen[thread] = Some(i);
        }
    }

    #[test]
    fn test_invalid_config() {
        assert!(LogStore::new(LogStoreConfig::for_testing(0)).is_err());
        assert!(LogStore::new(LogStoreConfig::for_testing(100_000)).is_err());
    }

    #[test]
    fn test_unknown_partition() {
        let store = store(2);
        let err = store.append(PartitionId::new(2), "k", "v").unwrap_err();
        assert_eq!(err.kind(), relay_core::ErrorKind::InvalidState);

        let err = store.read(PartitionId::new(7), SequenceId::new(0), 1).unwrap_err();
        assert!(matches!(err, PartitionError::UnknownPartition { .. }));
    }

    #[test]
    fn test_partitions_are_independent() {
        let store = store(2);
        store.append(PartitionId::new(0), "k", "a").unwrap();
        store.append(PartitionId::new(0), "k", "b").unwrap();
        let seq = store.append(PartitionId::new(1), "k", "c").unwrap();

        assert_eq!(seq, SequenceId::new(0));
        assert_eq!(
            store.metadata(PartitionId::new(0)).unwrap().log_end,
            SequenceId::new(2)
        );
    }

    #[test]
    fn test_batch_is_contiguous() {
        let store = store(1);
        let p0 = PartitionId::new(0);
        store.append(p0, "k", "x").unwrap();

        let first = store.append_batch(p0, &batch(&["a", "b", "c"])).unwrap();
        assert_eq!(first, SequenceId::new(1));
        assert_eq!(store.metadata(p0).unwrap().log_end, SequenceId::new(4));
    }

    #[test]
    fn test_rejects_bad_batches() {
        let limits = Limits {
            max_payload_bytes: 4,
            max_batch_records: 2,
            ..Limits::default()
        };
        let store = LogStore::new(LogStoreConfig::for_testing(1).with_limits(limits)).unwrap();
        let p0 = PartitionId::new(0);

        assert!(store.append_batch(p0, &[]).is_err());
        assert!(store.append_batch(p0, &batch(&["a", "b", "c"])).is_err());
        assert!(store.append(p0, "k", "too long").is_err());
        assert_eq!(store.metadata(p0).unwrap().log_end, SequenceId::new(0));
    }

    #[test]
    fn test_read_edges() {
        let store = store(1);
        let p0 = PartitionId::new(0);
        store.append_batch(p0, &batch(&["a", "b", "c"])).unwrap();

        assert_eq!(store.read(p0, SequenceId::new(1), 1).unwrap().len(), 1);
        assert!(store.read(p0, SequenceId::new(3), 10).unwrap().is_empty());
        assert!(store.read(p0, SequenceId::new(0), 0).is_err());
    }

    #[test]
    fn test_read_purged_sequence_is_expired() {
        let store = store(1);
        let p0 = PartitionId::new(0);
        for _ in 0..3 {
            store.append_batch(p0, &batch(&["a", "b", "c", "d"])).unwrap();
        }

        assert_eq!(store.purge_before(p0, SequenceId::new(4)).unwrap(), 4);
        let err = store.read(p0, SequenceId::new(0), 10).unwrap_err();
        assert_eq!(err.kind(), relay_core::ErrorKind::DataExpired);
        assert_eq!(store.metadata(p0).unwrap().log_start, SequenceId::new(4));
    }

    #[test]
    fn test_retention_across_partitions() {
        let config = LogStoreConfig::for_testing(2)
            .with_retention(RetentionPolicy::unbounded().with_max_age(Duration::from_secs(10)));
        let store = LogStore::new(config).unwrap();
        let t0 = Timestamp::from_millis(1_000);

        for id in store.partition_ids() {
            store.append_batch_at(id, &batch(&["a", "b"]), t0).unwrap();
        }

        assert_eq!(store.enforce_retention_at(Timestamp::from_millis(2_000)), 0);
        assert_eq!(store.enforce_retention_at(Timestamp::from_millis(11_000)), 4);
        for id in store.partition_ids() {
            assert!(store.read(id, SequenceId::new(0), 1).is_err());
        }
    }

    #[test]
    fn test_injected_throttle() {
        let store = store(1);
        let p0 = PartitionId::new(0);
        *store.fault_config() = LogFaultConfig::throttling(2);

        assert!(matches!(
            store.append(p0, "k", "v"),
            Err(PartitionError::Throttled { .. })
        ));
        assert!(store.append(p0, "k", "v").unwrap_err().is_transient());
        assert_eq!(store.append(p0, "k", "v").unwrap(), SequenceId::new(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_throttle() {
        let config = LogStoreConfig::for_testing(1)
            .with_throttle(TokenBucketConfig::new(2, 1_000).with_initial_tokens(2));
        let store = LogStore::new(config).unwrap();
        let p0 = PartitionId::new(0);

        store.append_batch(p0, &batch(&["a", "b"])).unwrap();
        let err = store.append(p0, "k", "c").unwrap_err();
        let PartitionError::Throttled { retry_after, .. } = err else {
            panic!("expected throttle, got {err:?}");
        };
        assert!(retry_after > Duration::ZERO);

        tokio::time::advance(retry_after).await;
        assert_eq!(store.append(p0, "k", "c").unwrap(), SequenceId::new(2));

        let err = store.append_batch(p0, &batch(&["a", "b", "c"])).unwrap_err();
        assert_eq!(err.kind(), relay_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_cursor_is_lazy_and_restartable() {
        let store = Arc::new(store(1));
        let p0 = PartitionId::new(0);
        store.append_batch(p0, &batch(&["a", "b", "c"])).unwrap();

        let mut cursor = store
            .cursor(p0, SequenceId::new(0))
            .unwrap()
            .with_chunk_records(2);
        assert_eq!(cursor.next().unwrap().unwrap().payload, Bytes::from("a"));
        assert_eq!(cursor.position(), SequenceId::new(1));

        // Resume from the saved position on a fresh cursor.
        let resumed: Vec<Bytes> = store
            .cursor(p0, cursor.position())
            .unwrap()
            .map(|r| r.unwrap().payload)
            .collect();
        assert_eq!(resumed, vec![Bytes::from("b"), Bytes::from("c")]);

        // Drain, then observe new appends on the same cursor.
        assert_eq!(cursor.by_ref().count(), 2);
        assert!(cursor.next().is_none());
        store.append(p0, "k", "d").unwrap();
        assert_eq!(cursor.next().unwrap().unwrap().payload, Bytes::from("d"));
    }

    #[test]
    fn test_cursor_reports_expiry() {
        let store = Arc::new(store(1));
        let p0 = PartitionId::new(0);
        for _ in 0..2 {
            store.append_batch(p0, &batch(&["a", "b", "c", "d"])).unwrap();
        }
        let mut cursor = store.cursor(p0, SequenceId::new(0)).unwrap();
        store.purge_before(p0, SequenceId::new(4)).unwrap();

        assert!(matches!(
            cursor.next(),
            Some(Err(PartitionError::DataExpired { .. }))
        ));
        cursor.seek(SequenceId::new(4));
        assert_eq!(cursor.next().unwrap().unwrap().sequence_id, SequenceId::new(4));
    }
}
