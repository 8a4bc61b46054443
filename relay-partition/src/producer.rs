//! Producer client for appending records to the log store.
//!
//! The producer handles:
//! - Partitioning (hashing the partition key to select a partition)
//! - Retrying throttled appends with exponential backoff and jitter
//! - Batched submission with per-record status
//!
//! A record is either appended or the caller receives an error for it;
//! nothing is dropped silently.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{join_all, ready};
use relay_core::{retry_with_backoff, PartitionId, RetryPolicy, SequenceId};
use tracing::{debug, warn};

use crate::error::{PartitionError, PartitionResult};
use crate::partitioner;
use crate::store::LogStore;

/// Configuration for the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    /// Retry policy for throttled appends.
    pub retry: RetryPolicy,
    /// Maximum records appended in one call to the store.
    pub max_batch_records: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_batch_records: 500,
        }
    }
}

impl ProducerConfig {
    /// Fast retries for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            retry: RetryPolicy::for_testing(),
            max_batch_records: 500,
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-append record cap.
    #[must_use]
    pub const fn with_max_batch_records(mut self, max_batch_records: u32) -> Self {
        self.max_batch_records = max_batch_records;
        self
    }
}

/// A record waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    /// Key used to select the partition.
    pub partition_key: Bytes,
    /// Opaque payload.
    pub payload: Bytes,
}

impl OutgoingRecord {
    /// Creates an outgoing record.
    #[must_use]
    pub fn new(partition_key: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            partition_key: partition_key.into(),
            payload: payload.into(),
        }
    }
}

/// Where a record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Produced {
    /// Partition the record was appended to.
    pub partition_id: PartitionId,
    /// Sequence id assigned to the record.
    pub sequence_id: SequenceId,
}

/// Appends records to a shared log store.
#[derive(Debug, Clone)]
pub struct Producer {
    store: Arc<LogStore>,
    config: ProducerConfig,
}

impl Producer {
    /// Creates a producer over `store`.
    #[must_use]
    pub const fn new(store: Arc<LogStore>, config: ProducerConfig) -> Self {
        Self { store, config }
    }

    /// Returns the producer configuration.
    #[must_use]
    pub const fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Sends one record.
    ///
    /// # Errors
    /// - `InvalidArgument` if the key or payload breaks a limit
    /// - `DeliveryFailed` if the partition stayed throttled through every retry
    pub async fn send(
        &self,
        partition_key: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> PartitionResult<Produced> {
        let record = OutgoingRecord::new(partition_key, payload);
        let partition_id = self.route(&record)?;
        let sequence_id = self
            .append_with_retry(partition_id, vec![(record.partition_key, record.payload)])
            .await?;
        debug!(partition = %partition_id, sequence = %sequence_id, "Sent record");
        Ok(Produced {
            partition_id,
            sequence_id,
        })
    }

    /// Sends records that may target different partitions.
    ///
    /// Records are grouped by partition, keeping input order within each
    /// partition. Each partition's records are appended independently and
    /// concurrently. Within a partition, a failed chunk fails every later
    /// chunk too, so a successful record never overtakes a failed one.
    ///
    /// Returns one status per input record, in input order.
    pub async fn send_batch(&self, records: Vec<OutgoingRecord>) -> Vec<PartitionResult<Produced>> {
        let total = records.len();
        let mut statuses: Vec<(usize, PartitionResult<Produced>)> = Vec::with_capacity(total);
        let mut by_partition: BTreeMap<PartitionId, Vec<(usize, OutgoingRecord)>> = BTreeMap::new();

        for (index, record) in records.into_iter().enumerate() {
            match self.route(&record) {
                Ok(partition_id) => by_partition
                    .entry(partition_id)
                    .or_default()
                    .push((index, record)),
                Err(err) => statuses.push((index, Err(err))),
            }
        }

        let partition_results = join_all(
            by_partition
                .into_iter()
                .map(|(partition_id, records)| self.send_partition(partition_id, records)),
        )
        .await;
        statuses.extend(partition_results.into_iter().flatten());

        statuses.sort_unstable_by_key(|(index, _)| *index);
        debug_assert_eq!(statuses.len(), total);
        statuses.into_iter().map(|(_, status)| status).collect()
    }

    /// Appends one partition's records in chunks, in order.
    async fn send_partition(
        &self,
        partition_id: PartitionId,
        records: Vec<(usize, OutgoingRecord)>,
    ) -> Vec<(usize, PartitionResult<Produced>)> {
        let chunk_size = self
            .config
            .max_batch_records
            .min(self.store.config().max_append_records())
            .max(1) as usize;
        let mut statuses = Vec::with_capacity(records.len());
        let mut failure: Option<PartitionError> = None;

        for chunk in records.chunks(chunk_size) {
            if let Some(err) = &failure {
                statuses.extend(chunk.iter().map(|(index, _)| (*index, Err(err.clone()))));
                continue;
            }

            let entries = chunk
                .iter()
                .map(|(_, record)| (record.partition_key.clone(), record.payload.clone()))
                .collect();
            match self.append_with_retry(partition_id, entries).await {
                Ok(first) => {
                    statuses.extend(chunk.iter().zip(0u64..).map(|((index, _), offset)| {
                        (
                            *index,
                            Ok(Produced {
                                partition_id,
                                sequence_id: first.advance(offset),
                            }),
                        )
                    }));
                }
                Err(err) => {
                    statuses.extend(chunk.iter().map(|(index, _)| (*index, Err(err.clone()))));
                    failure = Some(err);
                }
            }
        }

        statuses
    }

    /// Validates a record against the store limits and picks its partition.
    fn route(&self, record: &OutgoingRecord) -> PartitionResult<PartitionId> {
        self.store
            .config()
            .limits
            .check_record(&record.partition_key, &record.payload)?;
        partitioner::assign(&record.partition_key, self.store.partition_count())
    }

    /// Appends `entries` atomically, retrying while the store throttles.
    async fn append_with_retry(
        &self,
        partition_id: PartitionId,
        entries: Vec<(Bytes, Bytes)>,
    ) -> PartitionResult<SequenceId> {
        let (result, attempts) = retry_with_backoff(
            &self.config.retry,
            PartitionError::is_transient,
            |_| ready(self.store.append_batch(partition_id, &entries)),
        )
        .await;

        match result {
            Ok(first) => Ok(first),
            Err(err) if err.is_transient() => {
                warn!(
                    partition = %partition_id,
                    attempts,
                    records = entries.len(),
                    error = %err,
                    "Delivery failed"
                );
                let retry_after = match &err {
                    PartitionError::Throttled { retry_after, .. } => Some(*retry_after),
                    _ => None,
                };
                Err(PartitionError::DeliveryFailed {
                    partition_id,
                    attempts,
                    last_error: err.to_string(),
                    retry_after,
                })
            }
            Err(err) => Err(err),
        }
    }
}
