//! Relay service: the log, producer and checkpoint store behind the API.

use std::sync::Arc;

use bytes::Bytes;
use relay_core::{ConsumerGroup, PartitionId, SequenceId};
use relay_partition::{
    LogStore, OutgoingRecord, PartitionError, PartitionMetadata, PartitionResult, Produced,
    Producer,
};
use relay_progress::{
    CheckpointStore, FileCheckpointConfig, FileCheckpointStore, SimulatedCheckpointStore,
};
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::error::ServerResult;

/// The relay service.
///
/// Cheap to clone; clones share the same stores.
#[derive(Clone)]
pub struct RelayService {
    log: Arc<LogStore>,
    producer: Producer,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl RelayService {
    /// Creates a service over existing stores.
    #[must_use]
    pub fn new(producer: Producer, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            log: Arc::clone(producer.store()),
            producer,
            checkpoints,
        }
    }

    /// Builds the stores described by `config`.
    ///
    /// Checkpoints live in a file when `checkpoint.path` is set and in
    /// memory otherwise.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the checkpoint
    /// file cannot be loaded.
    pub async fn open(config: &RelayConfig) -> ServerResult<Self> {
        config.validate()?;
        let log = Arc::new(LogStore::new(config.log_store_config())?);
        let producer = Producer::new(Arc::clone(&log), config.producer_config());

        let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint.path {
            Some(path) => {
                let file_config =
                    FileCheckpointConfig::new(path.clone()).with_fsync(config.checkpoint.fsync);
                Arc::new(FileCheckpointStore::open(file_config).await?)
            }
            None => Arc::new(SimulatedCheckpointStore::new(0)),
        };

        info!(
            partitions = log.partition_count(),
            checkpoint_path = ?config.checkpoint.path,
            "Relay service ready"
        );
        Ok(Self::new(producer, checkpoints))
    }

    /// Returns the log store.
    #[must_use]
    pub const fn log(&self) -> &Arc<LogStore> {
        &self.log
    }

    /// Returns the checkpoint store.
    #[must_use]
    pub const fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Appends one record, routed by its key.
    ///
    /// # Errors
    /// Propagates producer errors.
    pub async fn produce(&self, partition_key: String, payload: String) -> ServerResult<Produced> {
        let produced = self
            .producer
            .send(Bytes::from(partition_key), Bytes::from(payload))
            .await?;
        debug!(
            partition = %produced.partition_id,
            sequence = %produced.sequence_id,
            "Produced record"
        );
        Ok(produced)
    }

    /// Appends several records. Returns one result per record, in order.
    pub async fn produce_batch(
        &self,
        records: Vec<(String, String)>,
    ) -> Vec<PartitionResult<Produced>> {
        let records = records
            .into_iter()
            .map(|(key, payload)| OutgoingRecord::new(key, payload))
            .collect();
        self.producer.send_batch(records).await
    }

    /// Returns the committed sequence id of `group` on `partition`.
    ///
    /// # Errors
    /// - `InvalidArgument` if the group name is invalid
    /// - `UnknownPartition` if the partition does not exist
    pub async fn checkpoint(
        &self,
        group: &str,
        partition: u64,
    ) -> ServerResult<(ConsumerGroup, PartitionId, Option<SequenceId>)> {
        let group = ConsumerGroup::new(group)?;
        let partition_id = self.partition_id(partition)?;
        let sequence_id = self.checkpoints.get(&group, partition_id).await?;
        Ok((group, partition_id, sequence_id))
    }

    /// Returns metadata for `partition`.
    ///
    /// # Errors
    /// Returns `UnknownPartition` if the partition does not exist.
    pub fn partition(&self, partition: u64) -> ServerResult<PartitionMetadata> {
        let partition_id = self.partition_id(partition)?;
        Ok(self.log.metadata(partition_id)?)
    }

    fn partition_id(&self, partition: u64) -> ServerResult<PartitionId> {
        let partition_count = self.log.partition_count();
        if partition >= u64::from(partition_count) {
            return Err(PartitionError::UnknownPartition {
                partition_id: PartitionId::new(partition),
                partition_count,
            }
            .into());
        }
        Ok(PartitionId::new(partition))
    }
}
