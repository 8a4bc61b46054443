//! Batch handlers.
//!
//! A handler receives one ordered batch from one partition and either
//! accepts all of it or fails all of it. There is no partial acknowledgment:
//! a failed batch is redelivered whole.

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::{PartitionId, Record, SequenceId, Timestamp};
use thiserror::Error;
use tracing::info;

/// A record as seen by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredRecord {
    /// Position in the partition.
    pub sequence_id: SequenceId,
    /// Key the producer routed the record by.
    pub partition_key: Bytes,
    /// Payload, byte-for-byte as produced.
    pub payload: Bytes,
    /// When the log accepted the record.
    pub enqueue_time: Timestamp,
}

impl From<Record> for DeliveredRecord {
    fn from(record: Record) -> Self {
        Self {
            sequence_id: record.sequence_id,
            partition_key: record.partition_key,
            payload: record.payload,
            enqueue_time: record.enqueue_time,
        }
    }
}

/// An ordered, non-empty run of records from one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Partition the records came from.
    pub partition_id: PartitionId,
    /// Records in sequence order.
    pub records: Vec<DeliveredRecord>,
}

impl Batch {
    /// Builds a batch from records read from the log.
    ///
    /// Returns `None` if `records` is empty.
    #[must_use]
    pub fn from_records(partition_id: PartitionId, records: Vec<Record>) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        debug_assert!(records
            .windows(2)
            .all(|pair| pair[0].sequence_id < pair[1].sequence_id));
        Some(Self {
            partition_id,
            records: records.into_iter().map(DeliveredRecord::from).collect(),
        })
    }

    /// Sequence id of the first record.
    #[must_use]
    pub fn first_sequence(&self) -> SequenceId {
        self.records
            .first()
            .map_or(SequenceId::earliest(), |r| r.sequence_id)
    }

    /// Sequence id of the last record.
    #[must_use]
    pub fn last_sequence(&self) -> SequenceId {
        self.records
            .last()
            .map_or(SequenceId::earliest(), |r| r.sequence_id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A handler's report that it could not process a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Business logic invoked once per batch.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Processes the whole batch. Returning an error causes the same batch to
    /// be redelivered, up to the retry cap.
    async fn handle(&self, batch: &Batch) -> Result<(), HandlerError>;
}

/// Decodes every payload as JSON and logs it with its key and position.
///
/// A payload that is not valid JSON fails the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLogHandler;

#[async_trait]
impl BatchHandler for JsonLogHandler {
    async fn handle(&self, batch: &Batch) -> Result<(), HandlerError> {
        for record in &batch.records {
            let data: serde_json::Value =
                serde_json::from_slice(&record.payload).map_err(|e| {
                    HandlerError::new(format!(
                        "{} sequence {}: payload is not JSON: {e}",
                        batch.partition_id, record.sequence_id
                    ))
                })?;
            info!(
                partition = %batch.partition_id,
                partition_key = %String::from_utf8_lossy(&record.partition_key),
                sequence_id = %record.sequence_id,
                data = %data,
                "Record"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64, payload: &'static str) -> Record {
        let mut record = Record::new("PartitionKey1", payload);
        record.sequence_id = SequenceId::new(seq);
        record
    }

    #[test]
    fn test_batch_bounds() {
        let batch = Batch::from_records(
            PartitionId::new(0),
            vec![record(4, "a"), record(5, "b"), record(6, "c")],
        )
        .unwrap();
        assert_eq!(batch.first_sequence(), SequenceId::new(4));
        assert_eq!(batch.last_sequence(), SequenceId::new(6));
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.records[1].payload, Bytes::from("b"));
    }

    #[test]
    fn test_empty_batch_is_none() {
        assert!(Batch::from_records(PartitionId::new(0), Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_json_handler_accepts_json() {
        let batch = Batch::from_records(
            PartitionId::new(0),
            vec![record(0, r#"{"message":"Hello, Emi"}"#), record(1, "42")],
        )
        .unwrap();
        assert!(JsonLogHandler.handle(&batch).await.is_ok());
    }

    #[tokio::test]
    async fn test_json_handler_fails_on_plain_text() {
        let batch =
            Batch::from_records(PartitionId::new(2), vec![record(9, "Hello, Emi")]).unwrap();
        let err = JsonLogHandler.handle(&batch).await.unwrap_err();
        assert!(err.message().contains("sequence 9"), "{err}");
        assert!(err.message().contains("not JSON"));
    }
}
