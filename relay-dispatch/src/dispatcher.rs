//! Consumer dispatcher: one worker task per partition.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use relay_core::PartitionId;
use relay_partition::LogStore;
use relay_progress::CheckpointStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::DispatcherConfig;
use crate::dead_letter::{DeadLetterSink, MemoryDeadLetterSink};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::BatchHandler;
use crate::observer::{DispatchObserver, TracingObserver};
use crate::worker::{PartitionWorker, WorkerContext, WorkerState};

/// Builds and starts partition workers for one consumer group.
pub struct Dispatcher {
    ctx: WorkerContext,
}

impl Dispatcher {
    /// Creates a dispatcher with an in-memory dead-letter sink and a
    /// tracing observer.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` breaks the log's limits.
    pub fn new(
        config: DispatcherConfig,
        log: Arc<LogStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        handler: Arc<dyn BatchHandler>,
    ) -> DispatchResult<Self> {
        config.validate(&log.config().limits)?;
        Ok(Self {
            ctx: WorkerContext {
                config: Arc::new(config),
                log,
                checkpoints,
                handler,
                dead_letters: Arc::new(MemoryDeadLetterSink::new()),
                observer: Arc::new(TracingObserver),
            },
        })
    }

    /// Replaces the dead-letter sink.
    #[must_use]
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.ctx.dead_letters = sink;
        self
    }

    /// Replaces the observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.ctx.observer = observer;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.ctx.config
    }

    /// Starts a worker for every partition of the log.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// Propagates [`DispatcherHandle::spawn_partition`] errors.
    pub fn start(self) -> DispatchResult<DispatcherHandle> {
        let partitions: Vec<PartitionId> = self.ctx.log.partition_ids().collect();
        self.start_partitions(partitions)
    }

    /// Starts workers for the given partitions only.
    ///
    /// # Errors
    /// Propagates [`DispatcherHandle::spawn_partition`] errors.
    pub fn start_partitions(
        self,
        partitions: impl IntoIterator<Item = PartitionId>,
    ) -> DispatchResult<DispatcherHandle> {
        let (stop, _) = watch::channel(false);
        let handle = DispatcherHandle {
            ctx: self.ctx,
            stop,
            workers: Mutex::new(BTreeMap::new()),
        };
        for partition_id in partitions {
            handle.spawn_partition(partition_id)?;
        }
        info!(
            group = %handle.ctx.config.group,
            workers = handle.statuses().len(),
            "Dispatcher started"
        );
        Ok(handle)
    }
}

struct WorkerSlot {
    status: watch::Receiver<WorkerState>,
    task: JoinHandle<WorkerState>,
}

/// Running dispatcher.
///
/// Each partition has at most one live worker per handle.
pub struct DispatcherHandle {
    ctx: WorkerContext,
    stop: watch::Sender<bool>,
    workers: Mutex<BTreeMap<PartitionId, WorkerSlot>>,
}

impl DispatcherHandle {
    /// Starts a worker for `partition_id`, or restarts one that has exited.
    ///
    /// A restarted worker resumes from the committed checkpoint.
    ///
    /// # Errors
    /// - `PartitionOwned` if a worker for the partition is still running
    /// - `Log(UnknownPartition)` if the log has no such partition
    ///
    /// # Panics
    /// Panics if the workers lock is poisoned.
    pub fn spawn_partition(&self, partition_id: PartitionId) -> DispatchResult<()> {
        self.ctx.log.metadata(partition_id)?;

        let mut workers = self.workers.lock().expect("workers lock poisoned");
        if let Some(slot) = workers.get(&partition_id) {
            if !slot.task.is_finished() {
                return Err(DispatchError::PartitionOwned { partition_id });
            }
        }

        let worker = PartitionWorker::new(partition_id, self.ctx.clone());
        let status = worker.subscribe();
        let task = tokio::spawn(worker.run(self.stop.subscribe()));
        workers.insert(partition_id, WorkerSlot { status, task });
        Ok(())
    }

    /// Returns the state of a partition's worker.
    ///
    /// # Panics
    /// Panics if the workers lock is poisoned.
    #[must_use]
    pub fn status(&self, partition_id: PartitionId) -> Option<WorkerState> {
        let workers = self.workers.lock().expect("workers lock poisoned");
        workers.get(&partition_id).map(|slot| *slot.status.borrow())
    }

    /// Returns the state of every worker.
    ///
    /// # Panics
    /// Panics if the workers lock is poisoned.
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<PartitionId, WorkerState> {
        let workers = self.workers.lock().expect("workers lock poisoned");
        workers
            .iter()
            .map(|(id, slot)| (*id, *slot.status.borrow()))
            .collect()
    }

    /// Waits until the worker's state satisfies `predicate`.
    ///
    /// Returns `None` if there is no such worker, or if it exited without
    /// ever satisfying `predicate`.
    ///
    /// # Panics
    /// Panics if the workers lock is poisoned.
    pub async fn wait_for(
        &self,
        partition_id: PartitionId,
        predicate: impl Fn(WorkerState) -> bool,
    ) -> Option<WorkerState> {
        let mut status = {
            let workers = self.workers.lock().expect("workers lock poisoned");
            workers.get(&partition_id)?.status.clone()
        };
        status.wait_for(|state| predicate(*state)).await.ok().map(|s| *s)
    }

    /// Signals every worker to stop after its current batch.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Waits for every worker to exit. Returns their final states.
    ///
    /// # Panics
    /// Panics if the workers lock is poisoned.
    pub async fn join(self) -> BTreeMap<PartitionId, WorkerState> {
        let workers = std::mem::take(&mut *self.workers.lock().expect("workers lock poisoned"));

        let mut states = BTreeMap::new();
        for (partition_id, slot) in workers {
            let state = match slot.task.await {
                Ok(state) => state,
                Err(err) => {
                    error!(partition = %partition_id, error = %err, "Partition worker panicked");
                    WorkerState::Halted
                }
            };
            states.insert(partition_id, state);
        }

        info!(group = %self.ctx.config.group, "Dispatcher stopped");
        states
    }

    /// Stops every worker and waits for them to exit.
    pub async fn shutdown(self) -> BTreeMap<PartitionId, WorkerState> {
        self.stop();
        self.join().await
    }
}
