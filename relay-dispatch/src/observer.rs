//! Dispatch observability hook.
//!
//! The dispatcher reports every batch outcome to a [`DispatchObserver`].
//! Handlers stay free of logging concerns; the default observer turns
//! events into structured `tracing` records.

use std::sync::{Arc, Mutex};

use relay_core::{ConsumerGroup, PartitionId, SequenceId};
use tracing::{error, info, warn};

/// What happened to a batch or a partition worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The handler accepted the batch and the checkpoint advanced.
    Delivered {
        /// Handler attempts used.
        attempts: u32,
    },
    /// One handler attempt failed. The batch will be retried.
    Failed {
        /// The attempt that failed, starting at 1.
        attempt: u32,
        /// The failure.
        error: String,
    },
    /// Retries were exhausted and the batch went to the dead-letter sink.
    DeadLettered {
        /// Handler attempts made.
        attempts: u32,
        /// The failure from the final attempt.
        error: String,
    },
    /// The worker's position fell below the purge horizon.
    Expired {
        /// Position the worker asked for.
        requested: SequenceId,
        /// First sequence id still retained.
        horizon: SequenceId,
    },
    /// The worker halted and needs operator intervention.
    Halted {
        /// Why the worker halted.
        reason: String,
    },
}

impl BatchOutcome {
    /// Short name of the outcome, for logs and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Failed { .. } => "failed",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::Expired { .. } => "expired",
            Self::Halted { .. } => "halted",
        }
    }
}

/// An observed dispatch event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEvent {
    /// Consumer group of the worker.
    pub group: ConsumerGroup,
    /// Partition of the worker.
    pub partition_id: PartitionId,
    /// Inclusive sequence range of the batch, when the event concerns one.
    pub range: Option<(SequenceId, SequenceId)>,
    /// The outcome.
    pub outcome: BatchOutcome,
}

/// Receives dispatch events.
///
/// Called inline on the worker task, so implementations must be quick.
pub trait DispatchObserver: Send + Sync {
    /// Called for every event.
    fn on_event(&self, event: &DispatchEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_event(&self, event: &DispatchEvent) {
        let first = event.range.map(|(first, _)| first.get());
        let last = event.range.map(|(_, last)| last.get());
        let group = event.group.as_str();
        let partition = event.partition_id.get();

        match &event.outcome {
            BatchOutcome::Delivered { attempts } => info!(
                group, partition, first, last, attempts,
                "Batch delivered"
            ),
            BatchOutcome::Failed { attempt, error } => warn!(
                group, partition, first, last, attempt, error = %error,
                "Batch attempt failed"
            ),
            BatchOutcome::DeadLettered { attempts, error } => error!(
                group, partition, first, last, attempts, error = %error,
                "Batch dead-lettered"
            ),
            BatchOutcome::Expired { requested, horizon } => warn!(
                group, partition, requested = requested.get(), horizon = horizon.get(),
                "Position expired"
            ),
            BatchOutcome::Halted { reason } => error!(
                group, partition, reason = %reason,
                "Partition worker halted"
            ),
        }
    }
}

/// Keeps every event in memory. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<DispatchEvent>>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event so far.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    /// Returns the outcome names in order.
    #[must_use]
    pub fn outcome_names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.outcome.name()).collect()
    }
}

impl DispatchObserver for RecordingObserver {
    fn on_event(&self, event: &DispatchEvent) {
        self.events
            .lock()
            .expect("events lock poisoned")
            .push(event.clone());
    }
}

/// Forwards events to several observers.
pub struct FanoutObserver {
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl FanoutObserver {
    /// Creates a fan-out over `observers`.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn DispatchObserver>>) -> Self {
        Self { observers }
    }
}

impl DispatchObserver for FanoutObserver {
    fn on_event(&self, event: &DispatchEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
