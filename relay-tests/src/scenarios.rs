//! Reusable fixtures for relay tests.
//!
//! A [`Pipeline`] wires a log store, producer, checkpoint store,
//! dead-letter sink and observer together the way the server does, with
//! test-friendly timings. Handlers here fail on demand and record what
//! they were given.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::{ConsumerGroup, PartitionId, SequenceId};
use relay_dispatch::{
    Batch, BatchHandler, DispatchResult, Dispatcher, DispatcherConfig, DispatcherHandle,
    HandlerError, MemoryDeadLetterSink, RecordingObserver,
};
use relay_partition::{LogStore, LogStoreConfig, Producer, ProducerConfig};
use relay_progress::SimulatedCheckpointStore;

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];
}

/// Name of the consumer group used by fixtures.
pub const GROUP: &str = "groupX";

/// Returns the fixture consumer group.
///
/// # Panics
/// Never; [`GROUP`] is a valid name.
#[must_use]
pub fn group() -> ConsumerGroup {
    ConsumerGroup::new(GROUP).expect("fixture group name is valid")
}

/// Handler that fails its first `fail_first` invocations, then records and
/// accepts every batch.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    fail_first: AtomicU32,
    calls: AtomicU32,
    delivered: Mutex<Vec<Batch>>,
}

impl ScriptedHandler {
    /// Creates a handler that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that fails `count` times first.
    #[must_use]
    pub fn failing(count: u32) -> Self {
        Self {
            fail_first: AtomicU32::new(count),
            ..Self::default()
        }
    }

    /// Changes how many upcoming invocations fail.
    pub fn fail_next(&self, count: u32) {
        self.fail_first.store(count, Ordering::SeqCst);
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Batches accepted so far.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn delivered(&self) -> Vec<Batch> {
        self.delivered.lock().expect("delivered lock poisoned").clone()
    }

    /// `(partition, sequence, payload)` of every accepted record, in
    /// delivery order.
    #[must_use]
    pub fn delivered_records(&self) -> Vec<(PartitionId, SequenceId, Bytes)> {
        self.delivered()
            .into_iter()
            .flat_map(|batch| {
                let partition_id = batch.partition_id;
                batch
                    .records
                    .into_iter()
                    .map(move |r| (partition_id, r.sequence_id, r.payload))
            })
            .collect()
    }
}

#[async_trait]
impl BatchHandler for ScriptedHandler {
    async fn handle(&self, batch: &Batch) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HandlerError::new(format!(
                "rejected batch {}..={}",
                batch.first_sequence(),
                batch.last_sequence()
            )));
        }
        self.delivered
            .lock()
            .expect("delivered lock poisoned")
            .push(batch.clone());
        Ok(())
    }
}

/// A log, producer and consumer side wired together.
pub struct Pipeline {
    /// The log.
    pub log: Arc<LogStore>,
    /// Producer over the log.
    pub producer: Producer,
    /// Checkpoints; clones share state.
    pub checkpoints: SimulatedCheckpointStore,
    /// Dead letters; clones share state.
    pub dead_letters: MemoryDeadLetterSink,
    /// Every dispatch event.
    pub observer: RecordingObserver,
}

impl Pipeline {
    /// Creates a pipeline over `partitions` partitions with small segments.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    #[must_use]
    pub fn new(partitions: u32) -> Self {
        Self::with_log_config(LogStoreConfig::for_testing(partitions))
    }

    /// Creates a pipeline over a custom log configuration.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    #[must_use]
    pub fn with_log_config(config: LogStoreConfig) -> Self {
        let log = Arc::new(LogStore::new(config).expect("valid log config"));
        Self {
            producer: Producer::new(Arc::clone(&log), ProducerConfig::for_testing()),
            log,
            checkpoints: SimulatedCheckpointStore::new(0),
            dead_letters: MemoryDeadLetterSink::new(),
            observer: RecordingObserver::new(),
        }
    }

    /// Dispatcher configuration with fast timings.
    #[must_use]
    pub fn dispatcher_config() -> DispatcherConfig {
        DispatcherConfig::for_testing(group())
    }

    /// Starts a dispatcher over every partition.
    ///
    /// # Errors
    /// Propagates dispatcher errors.
    pub fn start(
        &self,
        config: DispatcherConfig,
        handler: Arc<dyn BatchHandler>,
    ) -> DispatchResult<DispatcherHandle> {
        self.dispatcher(config, handler)?.start()
    }

    /// Builds a dispatcher without starting it.
    ///
    /// # Errors
    /// Propagates dispatcher errors.
    pub fn dispatcher(
        &self,
        config: DispatcherConfig,
        handler: Arc<dyn BatchHandler>,
    ) -> DispatchResult<Dispatcher> {
        Ok(Dispatcher::new(
            config,
            Arc::clone(&self.log),
            Arc::new(self.checkpoints.clone()),
            handler,
        )?
        .with_dead_letter_sink(Arc::new(self.dead_letters.clone()))
        .with_observer(Arc::new(self.observer.clone())))
    }

    /// Committed checkpoint of the fixture group, read past any injected
    /// faults.
    #[must_use]
    pub fn checkpoint(&self, partition_id: PartitionId) -> Option<SequenceId> {
        self.checkpoints
            .snapshot()
            .into_iter()
            .find(|c| c.group == group() && c.partition_id == partition_id)
            .map(|c| c.sequence_id)
    }

    /// Waits until the fixture group's checkpoint on `partition_id`
    /// reaches `target`.
    pub async fn wait_for_checkpoint(&self, partition_id: PartitionId, target: SequenceId) {
        while self.checkpoint(partition_id) < Some(target) {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}
