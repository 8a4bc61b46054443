//! Dead-letter sinks.
//!
//! A batch whose handler retries are exhausted is written to a dead-letter
//! sink together with the last error, and its partition halts. Sinks are
//! append-only.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relay_core::{ConsumerGroup, PartitionId, SequenceId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::handler::{Batch, DeliveredRecord};

/// One record inside a dead letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Position in the partition.
    pub sequence_id: SequenceId,
    /// When the log accepted the record.
    pub enqueue_time: Timestamp,
    /// Partition key bytes.
    pub partition_key: Vec<u8>,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl From<&DeliveredRecord> for DeadLetterRecord {
    fn from(record: &DeliveredRecord) -> Self {
        Self {
            sequence_id: record.sequence_id,
            enqueue_time: record.enqueue_time,
            partition_key: record.partition_key.to_vec(),
            payload: record.payload.to_vec(),
        }
    }
}

/// A batch that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Consumer group that gave up on the batch.
    pub group: ConsumerGroup,
    /// Partition of the batch.
    pub partition_id: PartitionId,
    /// First sequence id of the batch.
    pub first_sequence: SequenceId,
    /// Last sequence id of the batch.
    pub last_sequence: SequenceId,
    /// The error from the final attempt.
    pub last_error: String,
    /// Handler attempts made.
    pub attempts: u32,
    /// When the batch was dead-lettered.
    pub failed_at: Timestamp,
    /// The records, in order.
    pub records: Vec<DeadLetterRecord>,
}

impl DeadLetter {
    /// Builds a dead letter for `batch`.
    #[must_use]
    pub fn new(group: ConsumerGroup, batch: &Batch, last_error: String, attempts: u32) -> Self {
        Self {
            group,
            partition_id: batch.partition_id,
            first_sequence: batch.first_sequence(),
            last_sequence: batch.last_sequence(),
            last_error,
            attempts,
            failed_at: Timestamp::now(),
            records: batch.records.iter().map(DeadLetterRecord::from).collect(),
        }
    }
}

/// Append-only destination for failed batches.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Durably records a dead letter.
    async fn publish(&self, letter: DeadLetter) -> DispatchResult<()>;
}

/// In-memory sink. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeadLetterSink {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
    fail_next: Arc<Mutex<u32>>,
}

impl MemoryDeadLetterSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every dead letter published so far.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().expect("dead letters lock poisoned").clone()
    }

    /// Makes the next `count` publishes fail.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    pub fn fail_next(&self, count: u32) {
        *self.fail_next.lock().expect("fault lock poisoned") = count;
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn publish(&self, letter: DeadLetter) -> DispatchResult<()> {
        {
            let mut fail_next = self.fail_next.lock().expect("fault lock poisoned");
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(DispatchError::DeadLetter {
                    message: "simulated failure (forced)".into(),
                });
            }
        }
        self.letters
            .lock()
            .expect("dead letters lock poisoned")
            .push(letter);
        Ok(())
    }
}

/// Sink writing one JSON document per line to a file.
#[derive(Debug)]
pub struct FileDeadLetterSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl FileDeadLetterSink {
    /// Opens `path` for appending, creating it and its parent directory if
    /// needed.
    ///
    /// # Errors
    /// Returns `DeadLetter` if the file cannot be opened.
    pub async fn open(path: impl Into<PathBuf>) -> DispatchResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error)?;

        // A crash mid-write can leave a partial last line.
        let contents = tokio::fs::read(&path).await.map_err(io_error)?;
        let complete = contents
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map_or(0, |newline| newline + 1);
        if complete < contents.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = contents.len() - complete,
                "Dropping torn dead-letter line"
            );
            file.set_len(complete as u64).await.map_err(io_error)?;
        }

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every dead letter from a sink file.
    ///
    /// # Errors
    /// Returns `DeadLetter` if the file cannot be read or a line is not a
    /// valid dead letter.
    pub async fn read_all(path: impl AsRef<Path>) -> DispatchResult<Vec<DeadLetter>> {
        let contents = tokio::fs::read_to_string(path).await.map_err(io_error)?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| DispatchError::DeadLetter {
                    message: format!("malformed dead letter: {e}"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl DeadLetterSink for FileDeadLetterSink {
    async fn publish(&self, letter: DeadLetter) -> DispatchResult<()> {
        let mut line = serde_json::to_vec(&letter).map_err(|e| DispatchError::DeadLetter {
            message: e.to_string(),
        })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        let start = file.metadata().await.map_err(io_error)?.len();
        if let Err(err) = write_line(&mut file, &line).await {
            // Cut the partial line so a retried publish starts clean.
            if let Err(truncate_err) = file.set_len(start).await {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "Failed to truncate partial dead letter"
                );
            }
            return Err(io_error(err));
        }

        debug!(
            path = %self.path.display(),
            partition = %letter.partition_id,
            first = %letter.first_sequence,
            last = %letter.last_sequence,
            "Wrote dead letter"
        );
        Ok(())
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

#[allow(clippy::needless_pass_by_value)]
fn io_error(err: std::io::Error) -> DispatchError {
    DispatchError::DeadLetter {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use relay_core::Record;

    use super::*;

    fn batch() -> Batch {
        let records = (0..3)
            .map(|i| {
                let mut record = Record::new("key", format!("payload-{i}"));
                record.sequence_id = SequenceId::new(10 + i);
                record
            })
            .collect();
        Batch::from_records(PartitionId::new(1), records).unwrap()
    }

    fn letter() -> DeadLetter {
        DeadLetter::new(
            ConsumerGroup::new("g").unwrap(),
            &batch(),
            "handler failed: boom".into(),
            6,
        )
    }

    #[test]
    fn test_letter_carries_range_and_error() {
        let letter = letter();
        assert_eq!(letter.first_sequence, SequenceId::new(10));
        assert_eq!(letter.last_sequence, SequenceId::new(12));
        assert_eq!(letter.records.len(), 3);
        assert_eq!(letter.records[2].payload, b"payload-2".to_vec());
        assert_eq!(letter.last_error, "handler failed: boom");
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemoryDeadLetterSink::new();
        let view = sink.clone();

        sink.fail_next(1);
        assert!(sink.publish(letter()).await.is_err());
        sink.publish(letter()).await.unwrap();

        assert_eq!(view.letters().len(), 1);
    }

    #[tokio::test]
    async fn test_file_sink_drops_torn_tail_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead-letters.jsonl");
        let complete = serde_json::to_string(&letter()).unwrap();
        std::fs::write(&path, format!("{complete}\n{}", &complete[..20])).unwrap();

        let sink = FileDeadLetterSink::open(&path).await.unwrap();
        sink.publish(letter()).await.unwrap();

        let letters = FileDeadLetterSink::read_all(&path).await.unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[1].last_sequence, SequenceId::new(12));
    }

    #[tokio::test]
    async fn test_file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq").join("dead-letters.jsonl");

        {
            let sink = FileDeadLetterSink::open(&path).await.unwrap();
            sink.publish(letter()).await.unwrap();
        }
        {
            let sink = FileDeadLetterSink::open(&path).await.unwrap();
            sink.publish(letter()).await.unwrap();
        }

        let letters = FileDeadLetterSink::read_all(&path).await.unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0], letter_without_time(&letters[0]));
        assert_eq!(letters[1].records[0].sequence_id, SequenceId::new(10));
    }

    fn letter_without_time(read: &DeadLetter) -> DeadLetter {
        DeadLetter {
            failed_at: read.failed_at,
            ..letter()
        }
    }
}
