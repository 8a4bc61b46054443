//! Partition worker.
//!
//! One worker owns one partition for one consumer group. It cycles through
//! `Idle → Polling → Delivering → Committing → Idle`, with
//! `Delivering → Retrying → Delivering` while the handler keeps failing.
//!
//! # Invariants
//!
//! - A checkpoint is committed only after the handler accepted the whole
//!   batch, and only for that batch's last sequence id.
//! - A failed batch is redelivered whole, never split. A handler panic
//!   or timeout counts as a failed attempt.
//! - After the final failed attempt the batch goes to the dead-letter sink
//!   and the worker halts; it never skips ahead on its own.
//! - The stop signal is checked between batches, never during one.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use relay_core::{retry_with_backoff, PartitionId, SequenceId};
use relay_partition::{LogStore, PartitionError};
use relay_progress::{CheckpointStore, ProgressError};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::config::{DispatcherConfig, ExpiredPolicy, StartPosition};
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::DispatchError;
use crate::handler::{Batch, BatchHandler};
use crate::observer::{BatchOutcome, DispatchEvent, DispatchObserver};

/// Lifecycle state of a partition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Waiting for the next poll.
    Idle,
    /// Reading the next batch.
    Polling,
    /// Invoking the handler.
    Delivering,
    /// Backing off before redelivering a failed batch.
    Retrying,
    /// Committing the checkpoint.
    Committing,
    /// Stopped on error; needs operator intervention.
    Halted,
    /// Stopped on request.
    Stopped,
}

impl WorkerState {
    /// Returns a stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Delivering => "delivering",
            Self::Retrying => "retrying",
            Self::Committing => "committing",
            Self::Halted => "halted",
            Self::Stopped => "stopped",
        }
    }

    /// Returns true if the worker has exited or will not make progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Halted | Self::Stopped)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one worker step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A batch was delivered and its checkpoint committed.
    Committed {
        /// First sequence id of the batch.
        first: SequenceId,
        /// Last sequence id of the batch, now the checkpoint.
        last: SequenceId,
        /// Handler attempts used.
        attempts: u32,
    },
    /// Nothing to deliver.
    Empty,
    /// The position was purged; the worker jumped to the new log start.
    Resynced {
        /// The purged position.
        from: SequenceId,
        /// The new position.
        to: SequenceId,
    },
    /// Retries were exhausted; the batch was dead-lettered and the worker
    /// halted.
    DeadLettered {
        /// First sequence id of the batch.
        first: SequenceId,
        /// Last sequence id of the batch.
        last: SequenceId,
        /// Handler attempts made.
        attempts: u32,
    },
    /// The worker is halted.
    Halted {
        /// Why.
        error: DispatchError,
    },
}

/// Everything a worker needs, shared by all workers of a dispatcher.
#[derive(Clone)]
pub struct WorkerContext {
    /// Dispatcher configuration.
    pub config: Arc<DispatcherConfig>,
    /// Source of records.
    pub log: Arc<LogStore>,
    /// Checkpoint storage.
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// Business logic.
    pub handler: Arc<dyn BatchHandler>,
    /// Destination of exhausted batches.
    pub dead_letters: Arc<dyn DeadLetterSink>,
    /// Outcome hook.
    pub observer: Arc<dyn DispatchObserver>,
}

/// Delivers one partition's records to the handler, in order.
pub struct PartitionWorker {
    partition_id: PartitionId,
    ctx: WorkerContext,
    /// Next sequence id to read; resolved from the checkpoint on first poll.
    position: Option<SequenceId>,
    state: watch::Sender<WorkerState>,
    halt_reason: Option<DispatchError>,
}

impl PartitionWorker {
    /// Creates an idle worker.
    #[must_use]
    pub fn new(partition_id: PartitionId, ctx: WorkerContext) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            partition_id,
            ctx,
            position: None,
            state,
            halt_reason: None,
        }
    }

    /// Returns the partition this worker owns.
    #[must_use]
    pub const fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Returns the next sequence id to be read, once resolved.
    #[must_use]
    pub const fn position(&self) -> Option<SequenceId> {
        self.position
    }

    /// Returns why the worker halted.
    #[must_use]
    pub const fn halt_reason(&self) -> Option<&DispatchError> {
        self.halt_reason.as_ref()
    }

    /// Runs one poll, deliver, commit cycle.
    pub async fn step(&mut self) -> StepOutcome {
        if let Some(error) = &self.halt_reason {
            return StepOutcome::Halted {
                error: error.clone(),
            };
        }

        self.set_state(WorkerState::Polling);
        let from = match self.resolve_position().await {
            Ok(from) => from,
            Err(error) => return self.halt(error, None),
        };

        let records = match self
            .ctx
            .log
            .read(self.partition_id, from, self.ctx.config.batch_size)
        {
            Ok(records) => records,
            Err(PartitionError::DataExpired {
                requested, horizon, ..
            }) => return self.on_expired(requested, horizon),
            Err(error) => return self.halt(error.into(), None),
        };

        let Some(batch) = Batch::from_records(self.partition_id, records) else {
            self.set_state(WorkerState::Idle);
            return StepOutcome::Empty;
        };
        debug!(
            partition = %self.partition_id,
            first = %batch.first_sequence(),
            last = %batch.last_sequence(),
            records = batch.len(),
            "Polled batch"
        );

        match self.deliver(&batch).await {
            Ok(attempts) => self.commit(&batch, attempts).await,
            Err((attempts, error)) => self.dead_letter(&batch, attempts, &error).await,
        }
    }

    /// Steps until stopped or halted. Returns the final state.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> WorkerState {
        info!(
            group = %self.ctx.config.group,
            partition = %self.partition_id,
            "Partition worker started"
        );

        loop {
            if *stop.borrow() {
                self.set_state(WorkerState::Stopped);
                break;
            }

            match self.step().await {
                StepOutcome::Committed { .. } | StepOutcome::Resynced { .. } => {}
                StepOutcome::Empty => {
                    tokio::select! {
                        () = sleep(self.ctx.config.poll_interval) => {}
                        changed = stop.changed() => {
                            if changed.is_err() {
                                // Dispatcher dropped.
                                self.set_state(WorkerState::Stopped);
                                break;
                            }
                        }
                    }
                }
                StepOutcome::DeadLettered { .. } | StepOutcome::Halted { .. } => break,
            }
        }

        let state = self.state();
        info!(
            group = %self.ctx.config.group,
            partition = %self.partition_id,
            state = %state,
            "Partition worker exited"
        );
        state
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    fn emit(&self, range: Option<(SequenceId, SequenceId)>, outcome: BatchOutcome) {
        self.ctx.observer.on_event(&DispatchEvent {
            group: self.ctx.config.group.clone(),
            partition_id: self.partition_id,
            range,
            outcome,
        });
    }

    async fn resolve_position(&mut self) -> Result<SequenceId, DispatchError> {
        if let Some(position) = self.position {
            return Ok(position);
        }

        let ctx = self.ctx.clone();
        let partition_id = self.partition_id;
        let policy = ctx
            .config
            .retry_policy
            .clone()
            .attempts(ctx.config.commit_attempts);
        let (committed, _) = retry_with_backoff(&policy, ProgressError::is_transient, |_| {
            ctx.checkpoints.get(&ctx.config.group, partition_id)
        })
        .await;

        let position = match committed? {
            Some(committed) => committed.next(),
            None => {
                let metadata = ctx.log.metadata(partition_id)?;
                match ctx.config.start_position {
                    StartPosition::Earliest => metadata.log_start,
                    StartPosition::Latest => metadata.log_end,
                }
            }
        };

        info!(
            group = %ctx.config.group,
            partition = %partition_id,
            position = %position,
            "Resolved start position"
        );
        self.position = Some(position);
        Ok(position)
    }

    fn on_expired(&mut self, requested: SequenceId, horizon: SequenceId) -> StepOutcome {
        self.emit(None, BatchOutcome::Expired { requested, horizon });
        match self.ctx.config.on_expired {
            ExpiredPolicy::Resync => {
                self.position = Some(horizon);
                self.set_state(WorkerState::Idle);
                StepOutcome::Resynced {
                    from: requested,
                    to: horizon,
                }
            }
            ExpiredPolicy::Halt => self.halt(
                PartitionError::DataExpired {
                    partition_id: self.partition_id,
                    requested,
                    horizon,
                }
                .into(),
                None,
            ),
        }
    }

    /// Invokes the handler until it succeeds or attempts run out.
    ///
    /// Returns the attempts used, or the attempts made and the last error.
    async fn deliver(&self, batch: &Batch) -> Result<u32, (u32, DispatchError)> {
        let config = &self.ctx.config;
        let max_attempts = config.max_attempts();
        let range = Some((batch.first_sequence(), batch.last_sequence()));
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.set_state(WorkerState::Delivering);

            let invocation = AssertUnwindSafe(self.ctx.handler.handle(batch)).catch_unwind();
            let error = match timeout(config.handler_timeout, invocation).await {
                Ok(Ok(Ok(()))) => return Ok(attempt),
                Ok(Ok(Err(err))) => DispatchError::Handler {
                    message: err.to_string(),
                },
                Ok(Err(panic)) => DispatchError::Handler {
                    message: format!("handler panicked: {}", panic_message(&*panic)),
                },
                Err(_) => DispatchError::HandlerTimeout {
                    timeout: config.handler_timeout,
                },
            };

            self.emit(
                range,
                BatchOutcome::Failed {
                    attempt,
                    error: error.to_string(),
                },
            );
            if attempt >= max_attempts {
                return Err((attempt, error));
            }

            self.set_state(WorkerState::Retrying);
            sleep(config.retry_policy.delay(attempt - 1)).await;
        }
    }

    async fn commit(&mut self, batch: &Batch, attempts: u32) -> StepOutcome {
        self.set_state(WorkerState::Committing);
        let (first, last) = (batch.first_sequence(), batch.last_sequence());

        let ctx = self.ctx.clone();
        let partition_id = self.partition_id;
        let policy = ctx
            .config
            .retry_policy
            .clone()
            .attempts(ctx.config.commit_attempts);
        let (result, commit_attempts) =
            retry_with_backoff(&policy, ProgressError::is_transient, |_| {
                ctx.checkpoints.commit(&ctx.config.group, partition_id, last)
            })
            .await;

        if let Err(error) = result {
            // The batch stays uncommitted and is redelivered after restart.
            return self.halt(error.into(), Some((first, last)));
        }

        self.position = Some(last.next());
        self.emit(Some((first, last)), BatchOutcome::Delivered { attempts });
        self.set_state(WorkerState::Idle);
        debug!(
            partition = %self.partition_id,
            checkpoint = %last,
            commit_attempts,
            "Committed checkpoint"
        );
        StepOutcome::Committed {
            first,
            last,
            attempts,
        }
    }

    async fn dead_letter(
        &mut self,
        batch: &Batch,
        attempts: u32,
        error: &DispatchError,
    ) -> StepOutcome {
        let (first, last) = (batch.first_sequence(), batch.last_sequence());
        let letter = DeadLetter::new(
            self.ctx.config.group.clone(),
            batch,
            error.to_string(),
            attempts,
        );

        let ctx = self.ctx.clone();
        let policy = ctx
            .config
            .retry_policy
            .clone()
            .attempts(ctx.config.commit_attempts);
        let (result, _) = retry_with_backoff(&policy, DispatchError::is_transient, |_| {
            ctx.dead_letters.publish(letter.clone())
        })
        .await;

        if let Err(sink_error) = result {
            return self.halt(sink_error, Some((first, last)));
        }

        self.emit(
            Some((first, last)),
            BatchOutcome::DeadLettered {
                attempts,
                error: error.to_string(),
            },
        );
        self.halt(
            DispatchError::DeadLettered {
                partition_id: self.partition_id,
                first,
                last,
                attempts,
            },
            Some((first, last)),
        );
        StepOutcome::DeadLettered {
            first,
            last,
            attempts,
        }
    }

    fn halt(
        &mut self,
        error: DispatchError,
        range: Option<(SequenceId, SequenceId)>,
    ) -> StepOutcome {
        self.emit(
            range,
            BatchOutcome::Halted {
                reason: error.to_string(),
            },
        );
        self.halt_reason = Some(error.clone());
        self.set_state(WorkerState::Halted);
        StepOutcome::Halted { error }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use relay_core::ConsumerGroup;
    use relay_partition::LogStoreConfig;
    use relay_progress::{
        Checkpoint, CheckpointFaultConfig, CommitOutcome, ProgressResult, SimulatedCheckpointStore,
    };

    use super::*;
    use crate::dead_letter::MemoryDeadLetterSink;
    use crate::handler::HandlerError;
    use crate::observer::RecordingObserver;

    /// Fails the first `fail_first` invocations, then succeeds.
    #[derive(Default)]
    struct ScriptedHandler {
        fail_first: u32,
        calls: AtomicU32,
        delivered: Mutex<Vec<Batch>>,
    }

    impl ScriptedHandler {
        fn failing(fail_first: u32) -> Self {
            Self {
                fail_first,
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchHandler for ScriptedHandler {
        async fn handle(&self, batch: &Batch) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(HandlerError::new(format!("failure {}", call + 1)));
            }
            self.delivered.lock().unwrap().push(batch.clone());
            Ok(())
        }
    }

    /// Never finishes within any sane deadline.
    struct StuckHandler;

    #[async_trait]
    impl BatchHandler for StuckHandler {
        async fn handle(&self, _batch: &Batch) -> Result<(), HandlerError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    /// Panics on every call.
    #[derive(Default)]
    struct PanickingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl BatchHandler for PanickingHandler {
        async fn handle(&self, _batch: &Batch) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("handler exploded");
        }
    }

    /// Counts commits that reach the inner store.
    struct CountingStore {
        inner: SimulatedCheckpointStore,
        commits: AtomicU32,
    }

    #[async_trait]
    impl CheckpointStore for CountingStore {
        async fn commit(
            &self,
            group: &ConsumerGroup,
            partition_id: PartitionId,
            sequence_id: SequenceId,
        ) -> ProgressResult<CommitOutcome> {
            let outcome = self.inner.commit(group, partition_id, sequence_id).await?;
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(outcome)
        }

        async fn get(
            &self,
            group: &ConsumerGroup,
            partition_id: PartitionId,
        ) -> ProgressResult<Option<SequenceId>> {
            self.inner.get(group, partition_id).await
        }

        async fn reset(
            &self,
            group: &ConsumerGroup,
            partition_id: PartitionId,
            sequence_id: Option<SequenceId>,
        ) -> ProgressResult<Option<SequenceId>> {
            self.inner.reset(group, partition_id, sequence_id).await
        }

        async fn list(&self, group: &ConsumerGroup) -> ProgressResult<Vec<Checkpoint>> {
            self.inner.list(group).await
        }

        async fn sync(&self) -> ProgressResult<()> {
            self.inner.sync().await
        }
    }

    struct Harness {
        log: Arc<LogStore>,
        checkpoints: Arc<CountingStore>,
        simulated: SimulatedCheckpointStore,
        dead_letters: MemoryDeadLetterSink,
        observer: RecordingObserver,
    }

    impl Harness {
        fn new() -> Self {
            let simulated = SimulatedCheckpointStore::new(7);
            Self {
                log: Arc::new(LogStore::new(LogStoreConfig::for_testing(1)).unwrap()),
                checkpoints: Arc::new(CountingStore {
                    inner: simulated.clone(),
                    commits: AtomicU32::new(0),
                }),
                simulated,
                dead_letters: MemoryDeadLetterSink::new(),
                observer: RecordingObserver::new(),
            }
        }

        fn group() -> ConsumerGroup {
            ConsumerGroup::new("groupX").unwrap()
        }

        fn worker(&self, config: DispatcherConfig, handler: Arc<dyn BatchHandler>) -> PartitionWorker {
            PartitionWorker::new(
                PartitionId::new(0),
                WorkerContext {
                    config: Arc::new(config),
                    log: Arc::clone(&self.log),
                    checkpoints: self.checkpoints.clone(),
                    handler,
                    dead_letters: Arc::new(self.dead_letters.clone()),
                    observer: Arc::new(self.observer.clone()),
                },
            )
        }

        fn append(&self, payloads: &[&'static str]) {
            for payload in payloads {
                self.log
                    .append(PartitionId::new(0), "PartitionKey1", Bytes::from_static(payload.as_bytes()))
                    .unwrap();
            }
        }

        async fn checkpoint(&self) -> Option<SequenceId> {
            self.simulated
                .get(&Self::group(), PartitionId::new(0))
                .await
                .unwrap()
        }

        fn commits(&self) -> u32 {
            self.checkpoints.commits.load(Ordering::SeqCst)
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig::for_testing(Harness::group()).with_max_retries(5)
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_and_commits() {
        let harness = Harness::new();
        harness.append(&["A", "B"]);
        let handler = Arc::new(ScriptedHandler::default());
        let mut worker = harness.worker(config(), handler.clone());

        let outcome = worker.step().await;
        assert_eq!(
            outcome,
            StepOutcome::Committed {
                first: SequenceId::new(0),
                last: SequenceId::new(1),
                attempts: 1,
            }
        );
        assert_eq!(harness.checkpoint().await, Some(SequenceId::new(1)));
        assert_eq!(worker.position(), Some(SequenceId::new(2)));
        assert_eq!(worker.state(), WorkerState::Idle);

        let delivered = handler.delivered.lock().unwrap();
        assert_eq!(delivered[0].records[0].payload, Bytes::from("A"));
        assert_eq!(delivered[0].records[1].payload, Bytes::from("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_success_commits_once() {
        let harness = Harness::new();
        harness.append(&["A", "B"]);
        let handler = Arc::new(ScriptedHandler::failing(3));
        let mut worker = harness.worker(config(), handler.clone());

        let outcome = worker.step().await;
        assert!(matches!(outcome, StepOutcome::Committed { attempts: 4, .. }));
        assert_eq!(handler.calls(), 4);
        assert_eq!(harness.commits(), 1);
        assert_eq!(harness.checkpoint().await, Some(SequenceId::new(1)));
        assert_eq!(
            harness.observer.outcome_names(),
            vec!["failed", "failed", "failed", "delivered"]
        );
        assert!(harness.dead_letters.letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_six_failures_dead_letters_and_halts() {
        let harness = Harness::new();
        harness.append(&["A", "B"]);
        let handler = Arc::new(ScriptedHandler::failing(6));
        let mut worker = harness.worker(config(), handler.clone());

        let outcome = worker.step().await;
        assert_eq!(
            outcome,
            StepOutcome::DeadLettered {
                first: SequenceId::new(0),
                last: SequenceId::new(1),
                attempts: 6,
            }
        );
        assert_eq!(handler.calls(), 6);
        assert_eq!(harness.commits(), 0);
        assert_eq!(harness.checkpoint().await, None);
        assert_eq!(worker.state(), WorkerState::Halted);

        let letters = harness.dead_letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].first_sequence, SequenceId::new(0));
        assert_eq!(letters[0].last_sequence, SequenceId::new(1));
        assert_eq!(letters[0].attempts, 6);
        assert!(letters[0].last_error.contains("failure 6"));

        // Halted workers do nothing until restarted.
        assert!(matches!(worker.step().await, StepOutcome::Halted { .. }));
        assert_eq!(handler.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let harness = Harness::new();
        harness.append(&["A"]);
        let config = config()
            .with_max_retries(1)
            .with_handler_timeout(Duration::from_millis(50));
        let mut worker = harness.worker(config, Arc::new(StuckHandler));

        let outcome = worker.step().await;
        assert!(matches!(outcome, StepOutcome::DeadLettered { attempts: 2, .. }));
        assert!(harness.dead_letters.letters()[0]
            .last_error
            .contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_is_retried_then_dead_lettered() {
        let harness = Harness::new();
        harness.append(&["A"]);
        let handler = Arc::new(PanickingHandler::default());
        let worker = harness.worker(config().with_max_retries(2), handler.clone());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let state = tokio::spawn(worker.run(stop_rx)).await.unwrap();
        assert_eq!(state, WorkerState::Halted);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(harness.checkpoint().await, None);

        let letters = harness.dead_letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert!(letters[0].last_error.contains("handler panicked: handler exploded"));
        assert_eq!(
            harness.observer.outcome_names(),
            vec!["failed", "failed", "failed", "dead_lettered", "halted"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_after_checkpoint() {
        let harness = Harness::new();
        harness.append(&["A", "B", "C"]);
        harness
            .simulated
            .commit(&Harness::group(), PartitionId::new(0), SequenceId::new(1))
            .await
            .unwrap();
        let handler = Arc::new(ScriptedHandler::default());
        let mut worker = harness.worker(config(), handler.clone());

        assert!(matches!(
            worker.step().await,
            StepOutcome::Committed { first, .. } if first == SequenceId::new(2)
        ));
        assert_eq!(worker.step().await, StepOutcome::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_start_skips_backlog() {
        let harness = Harness::new();
        harness.append(&["old"]);
        let handler = Arc::new(ScriptedHandler::default());
        let mut worker = harness.worker(
            config().with_start_position(StartPosition::Latest),
            handler.clone(),
        );

        assert_eq!(worker.step().await, StepOutcome::Empty);
        harness.append(&["new"]);
        worker.step().await;

        let delivered = handler.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].records[0].payload, Bytes::from("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_bounded() {
        let harness = Harness::new();
        harness.append(&["a", "b", "c", "d", "e"]);
        let handler = Arc::new(ScriptedHandler::default());
        let mut worker = harness.worker(config().with_batch_size(2), handler.clone());

        while worker.step().await != StepOutcome::Empty {}

        let sizes: Vec<usize> = handler.delivered.lock().unwrap().iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(harness.checkpoint().await, Some(SequenceId::new(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_position_resyncs() {
        let harness = Harness::new();
        harness.append(&["a", "b", "c", "d", "e", "f"]);
        let handler = Arc::new(ScriptedHandler::default());
        let mut worker = harness.worker(config().with_batch_size(1), handler.clone());
        worker.step().await;

        harness
            .log
            .purge_before(PartitionId::new(0), SequenceId::new(4))
            .unwrap();

        assert_eq!(
            worker.step().await,
            StepOutcome::Resynced {
                from: SequenceId::new(1),
                to: SequenceId::new(4),
            }
        );
        assert!(matches!(
            worker.step().await,
            StepOutcome::Committed { first, .. } if first == SequenceId::new(4)
        ));
        assert!(harness.observer.outcome_names().contains(&"expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_position_can_halt() {
        let harness = Harness::new();
        harness.append(&["a", "b", "c", "d", "e", "f"]);
        harness
            .simulated
            .commit(&Harness::group(), PartitionId::new(0), SequenceId::new(0))
            .await
            .unwrap();
        harness
            .log
            .purge_before(PartitionId::new(0), SequenceId::new(4))
            .unwrap();

        let config = config().with_on_expired(ExpiredPolicy::Halt);
        let mut worker = harness.worker(config, Arc::new(ScriptedHandler::default()));

        let StepOutcome::Halted { error } = worker.step().await else {
            panic!("expected halt");
        };
        assert_eq!(error.kind(), relay_core::ErrorKind::DataExpired);
        assert_eq!(worker.state(), WorkerState::Halted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_commit_failures_are_retried() {
        let harness = Harness::new();
        harness.append(&["A"]);
        *harness.simulated.fault_config() = CheckpointFaultConfig::none().with_failing_commits(2);
        let mut worker = harness.worker(config(), Arc::new(ScriptedHandler::default()));

        assert!(matches!(worker.step().await, StepOutcome::Committed { .. }));
        assert_eq!(harness.checkpoint().await, Some(SequenceId::new(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_exhaustion_halts_without_advancing() {
        let harness = Harness::new();
        harness.append(&["A"]);
        *harness.simulated.fault_config() = CheckpointFaultConfig::none().with_failing_commits(10);
        let handler = Arc::new(ScriptedHandler::default());
        let mut worker = harness.worker(config().with_commit_attempts(3), handler.clone());

        let StepOutcome::Halted { error } = worker.step().await else {
            panic!("expected halt");
        };
        assert_eq!(error.kind(), relay_core::ErrorKind::Io);
        assert_eq!(worker.position(), Some(SequenceId::new(0)));
        assert_eq!(harness.checkpoint().await, None);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_sink_failure_halts() {
        let harness = Harness::new();
        harness.append(&["A"]);
        harness.dead_letters.fail_next(100);
        let mut worker = harness.worker(
            config().with_max_retries(0).with_commit_attempts(2),
            Arc::new(ScriptedHandler::failing(1)),
        );

        let StepOutcome::Halted { error } = worker.step().await else {
            panic!("expected halt");
        };
        assert!(matches!(error, DispatchError::DeadLetter { .. }));
        assert_eq!(harness.checkpoint().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_between_batches() {
        let harness = Harness::new();
        harness.append(&["A"]);
        let worker = harness.worker(config(), Arc::new(ScriptedHandler::default()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(worker.run(stop_rx));
        while harness.checkpoint().await.is_none() {
            sleep(Duration::from_millis(1)).await;
        }

        stop_tx.send(true).unwrap();
        assert_eq!(task.await.unwrap(), WorkerState::Stopped);
        assert_eq!(harness.checkpoint().await, Some(SequenceId::new(0)));
    }
}
