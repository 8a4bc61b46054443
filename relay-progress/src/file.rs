//! File-backed checkpoint store.
//!
//! The whole checkpoint table is kept in memory and written as one JSON
//! document on every change. Writes go to a temporary sibling file which is
//! fsynced and then renamed over the target, so a crash leaves either the
//! old or the new table on disk, never a torn one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay_core::{ConsumerGroup, PartitionId, SequenceId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ProgressError, ProgressResult};
use crate::storage::CheckpointStore;
use crate::types::{Checkpoint, CheckpointTable, CommitOutcome};

/// On-disk format version.
const FORMAT_VERSION: u32 = 1;

/// Configuration for the file checkpoint store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheckpointConfig {
    /// Path of the checkpoint file.
    pub path: PathBuf,
    /// Fsync the file before renaming it into place.
    pub fsync: bool,
}

impl FileCheckpointConfig {
    /// Creates a configuration writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: true,
        }
    }

    /// Sets whether writes are fsynced.
    #[must_use]
    pub const fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    checkpoints: Vec<Checkpoint>,
}

/// Durable checkpoint store backed by a single JSON file.
#[derive(Debug)]
pub struct FileCheckpointStore {
    config: FileCheckpointConfig,
    /// Held across the write so commits are serialized.
    table: Mutex<CheckpointTable>,
}

impl FileCheckpointStore {
    /// Opens the store, loading existing checkpoints if the file exists.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read or `Corruption` if it cannot
    /// be parsed.
    pub async fn open(config: FileCheckpointConfig) -> ProgressResult<Self> {
        let table = match fs::read(&config.path).await {
            Ok(bytes) => {
                let file: CheckpointFile =
                    serde_json::from_slice(&bytes).map_err(|e| ProgressError::Corruption {
                        message: format!("{}: {e}", config.path.display()),
                    })?;
                if file.version != FORMAT_VERSION {
                    return Err(ProgressError::Corruption {
                        message: format!("unsupported checkpoint file version {}", file.version),
                    });
                }
                CheckpointTable::from_checkpoints(file.checkpoints)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckpointTable::new(),
            Err(e) => return Err(ProgressError::io("open", &e)),
        };

        info!(
            path = %config.path.display(),
            checkpoints = table.len(),
            "Opened checkpoint store"
        );
        Ok(Self {
            config,
            table: Mutex::new(table),
        })
    }

    /// Returns the checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    async fn persist(&self, table: &CheckpointTable) -> ProgressResult<()> {
        let file = CheckpointFile {
            version: FORMAT_VERSION,
            checkpoints: table.to_checkpoints(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| ProgressError::Io {
            operation: "encode",
            message: e.to_string(),
        })?;

        if let Some(parent) = self.config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ProgressError::io("create_dir", &e))?;
            }
        }

        let tmp = self.config.path.with_extension("tmp");
        let mut out = fs::File::create(&tmp)
            .await
            .map_err(|e| ProgressError::io("create", &e))?;
        out.write_all(&bytes)
            .await
            .map_err(|e| ProgressError::io("write", &e))?;
        if self.config.fsync {
            out.sync_all()
                .await
                .map_err(|e| ProgressError::io("fsync", &e))?;
        }
        drop(out);

        fs::rename(&tmp, &self.config.path)
            .await
            .map_err(|e| ProgressError::io("rename", &e))?;
        debug!(path = %self.config.path.display(), bytes = bytes.len(), "Persisted checkpoints");
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn commit(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
        sequence_id: SequenceId,
    ) -> ProgressResult<CommitOutcome> {
        let mut table = self.table.lock().await;
        let mut next = table.clone();
        let outcome = next.commit(group, partition_id, sequence_id, Timestamp::now());
        if outcome.advanced() {
            self.persist(&next).await?;
            *table = next;
        }
        Ok(outcome)
    }

    async fn get(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
    ) -> ProgressResult<Option<SequenceId>> {
        Ok(self.table.lock().await.get(group, partition_id))
    }

    async fn reset(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
        sequence_id: Option<SequenceId>,
    ) -> ProgressResult<Option<SequenceId>> {
        let mut table = self.table.lock().await;
        let mut next = table.clone();
        let previous = next.reset(group, partition_id, sequence_id, Timestamp::now());
        self.persist(&next).await?;
        *table = next;

        info!(
            group = %group,
            partition = %partition_id,
            previous = ?previous,
            new = ?sequence_id,
            "Checkpoint reset"
        );
        Ok(previous)
    }

    async fn list(&self, group: &ConsumerGroup) -> ProgressResult<Vec<Checkpoint>> {
        Ok(self.table.lock().await.list(group))
    }

    async fn sync(&self) -> ProgressResult<()> {
        let table = self.table.lock().await;
        self.persist(&table).await
    }
}
