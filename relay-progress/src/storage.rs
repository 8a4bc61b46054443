//! Checkpoint storage abstraction.
//!
//! Provides the `CheckpointStore` trait for persisting consumer positions,
//! and `SimulatedCheckpointStore` for deterministic simulation testing.

#![allow(clippy::significant_drop_tightening)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relay_core::{ConsumerGroup, PartitionId, SequenceId, Timestamp};

use crate::error::{ProgressError, ProgressResult};
use crate::types::{Checkpoint, CheckpointTable, CommitOutcome};

// -----------------------------------------------------------------------------
// Checkpoint Store Trait
// -----------------------------------------------------------------------------

/// Durable storage for consumer checkpoints.
///
/// Commits are monotonic per `(group, partition)`: a commit at or below the
/// current checkpoint is a no-op, not an error. Only `reset` moves a
/// checkpoint backward.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Advances the checkpoint of `group` on `partition_id` to `sequence_id`.
    async fn commit(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
        sequence_id: SequenceId,
    ) -> ProgressResult<CommitOutcome>;

    /// Returns the committed sequence id, or `None` if nothing was committed.
    async fn get(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
    ) -> ProgressResult<Option<SequenceId>>;

    /// Operator reset: sets the checkpoint to `sequence_id` or clears it.
    /// Returns the previous value.
    async fn reset(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
        sequence_id: Option<SequenceId>,
    ) -> ProgressResult<Option<SequenceId>>;

    /// Lists the checkpoints of a group, ordered by partition.
    async fn list(&self, group: &ConsumerGroup) -> ProgressResult<Vec<Checkpoint>>;

    /// Flushes pending writes to durable storage.
    async fn sync(&self) -> ProgressResult<()>;
}

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated checkpoint store.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckpointFaultConfig {
    /// Probability of a commit failing with `Io`.
    pub commit_fail_rate: f64,
    /// Probability of a get failing with `Io`.
    pub get_fail_rate: f64,
    /// The next N commits fail with `Io`.
    pub fail_next_commits: u32,
    /// The next N gets fail with `Io`.
    pub fail_next_gets: u32,
}

impl CheckpointFaultConfig {
    /// No faults.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            commit_fail_rate: 0.0,
            get_fail_rate: 0.0,
            fail_next_commits: 0,
            fail_next_gets: 0,
        }
    }

    /// Occasional failures for chaos tests.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            commit_fail_rate: 0.1,
            get_fail_rate: 0.05,
            fail_next_commits: 0,
            fail_next_gets: 0,
        }
    }

    /// Sets the commit failure rate.
    #[must_use]
    pub const fn with_commit_fail_rate(mut self, rate: f64) -> Self {
        self.commit_fail_rate = rate;
        self
    }

    /// Sets the get failure rate.
    #[must_use]
    pub const fn with_get_fail_rate(mut self, rate: f64) -> Self {
        self.get_fail_rate = rate;
        self
    }

    /// Fails the next `count` commits.
    #[must_use]
    pub const fn with_failing_commits(mut self, count: u32) -> Self {
        self.fail_next_commits = count;
        self
    }
}

// -----------------------------------------------------------------------------
// Simulated Checkpoint Store
// -----------------------------------------------------------------------------

/// In-memory checkpoint store with deterministic fault injection.
///
/// Clones share state, so a test can keep a handle while a dispatcher owns
/// another.
#[derive(Debug, Clone)]
pub struct SimulatedCheckpointStore {
    table: Arc<Mutex<CheckpointTable>>,
    fault_config: Arc<Mutex<CheckpointFaultConfig>>,
    seed: u64,
    counter: Arc<AtomicU64>,
}

impl SimulatedCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, CheckpointFaultConfig::none())
    }

    /// Creates an empty store with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: CheckpointFaultConfig) -> Self {
        Self {
            table: Arc::new(Mutex::new(CheckpointTable::new())),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the fault configuration for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, CheckpointFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Returns every checkpoint (bypasses faults, for invariant checking).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Checkpoint> {
        self.table
            .lock()
            .expect("table lock poisoned")
            .to_checkpoints()
    }

    /// Deterministic RNG: `(seed + counter) * M` gives reproducible faults.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    fn check_commit_fault(&self) -> ProgressResult<()> {
        let rate = {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.fail_next_commits > 0 {
                config.fail_next_commits -= 1;
                return Err(ProgressError::Io {
                    operation: "commit",
                    message: "simulated failure (forced)".into(),
                });
            }
            config.commit_fail_rate
        };
        if self.should_inject_fault(rate) {
            return Err(ProgressError::Io {
                operation: "commit",
                message: "simulated failure (random)".into(),
            });
        }
        Ok(())
    }

    fn check_get_fault(&self) -> ProgressResult<()> {
        let rate = {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.fail_next_gets > 0 {
                config.fail_next_gets -= 1;
                return Err(ProgressError::Io {
                    operation: "get",
                    message: "simulated failure (forced)".into(),
                });
            }
            config.get_fail_rate
        };
        if self.should_inject_fault(rate) {
            return Err(ProgressError::Io {
                operation: "get",
                message: "simulated failure (random)".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SimulatedCheckpointStore {
    async fn commit(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
        sequence_id: SequenceId,
    ) -> ProgressResult<CommitOutcome> {
        self.check_commit_fault()?;

        let mut table = self.table.lock().expect("table lock poisoned");
        let outcome = table.commit(group, partition_id, sequence_id, Timestamp::now());

        assert!(table.get(group, partition_id) >= Some(sequence_id));
        Ok(outcome)
    }

    async fn get(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
    ) -> ProgressResult<Option<SequenceId>> {
        self.check_get_fault()?;

        let table = self.table.lock().expect("table lock poisoned");
        Ok(table.get(group, partition_id))
    }

    async fn reset(
        &self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
        sequence_id: Option<SequenceId>,
    ) -> ProgressResult<Option<SequenceId>> {
        let mut table = self.table.lock().expect("table lock poisoned");
        Ok(table.reset(group, partition_id, sequence_id, Timestamp::now()))
    }

    async fn list(&self, group: &ConsumerGroup) -> ProgressResult<Vec<Checkpoint>> {
        let table = self.table.lock().expect("table lock poisoned");
        Ok(table.list(group))
    }

    async fn sync(&self) -> ProgressResult<()> {
        // No-op for in-memory store.
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn group_x() -> ConsumerGroup {
        ConsumerGroup::new("groupX").unwrap()
    }

    #[tokio::test]
    async fn test_commit_then_lower_commit_keeps_higher() {
        let store = SimulatedCheckpointStore::new(42);
        let p0 = PartitionId::new(0);

        store.commit(&group_x(), p0, SequenceId::new(1)).await.unwrap();
        let outcome = store.commit(&group_x(), p0, SequenceId::new(0)).await.unwrap();

        assert!(!outcome.advanced());
        assert_eq!(
            store.get(&group_x(), p0).await.unwrap(),
            Some(SequenceId::new(1))
        );
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = SimulatedCheckpointStore::new(42);
        assert_eq!(store.get(&group_x(), PartitionId::new(3)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = SimulatedCheckpointStore::new(42);
        let other = store.clone();
        store
            .commit(&group_x(), PartitionId::new(0), SequenceId::new(7))
            .await
            .unwrap();

        assert_eq!(
            other.get(&group_x(), PartitionId::new(0)).await.unwrap(),
            Some(SequenceId::new(7))
        );
        assert_eq!(other.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_forced_commit_failures() {
        let store = SimulatedCheckpointStore::with_faults(
            42,
            CheckpointFaultConfig::none().with_failing_commits(2),
        );
        let p0 = PartitionId::new(0);

        for _ in 0..2 {
            let err = store
                .commit(&group_x(), p0, SequenceId::new(1))
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        assert!(store.commit(&group_x(), p0, SequenceId::new(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_full_fail_rate() {
        let store = SimulatedCheckpointStore::with_faults(
            42,
            CheckpointFaultConfig::none()
                .with_commit_fail_rate(1.0)
                .with_get_fail_rate(1.0),
        );
        let p0 = PartitionId::new(0);

        assert!(store.commit(&group_x(), p0, SequenceId::new(1)).await.is_err());
        assert!(store.get(&group_x(), p0).await.is_err());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_faults_are_deterministic_per_seed() {
        async fn run(seed: u64) -> Vec<bool> {
            let store = SimulatedCheckpointStore::with_faults(seed, CheckpointFaultConfig::flaky());
            let mut outcomes = Vec::new();
            for i in 0..50 {
                outcomes.push(
                    store
                        .commit(&group_x(), PartitionId::new(0), SequenceId::new(i))
                        .await
                        .is_ok(),
                );
            }
            outcomes
        }

        assert_eq!(run(7).await, run(7).await);
    }

    #[tokio::test]
    async fn test_reset_and_list() {
        let store = SimulatedCheckpointStore::new(42);
        store
            .commit(&group_x(), PartitionId::new(1), SequenceId::new(9))
            .await
            .unwrap();
        store
            .commit(&group_x(), PartitionId::new(0), SequenceId::new(4))
            .await
            .unwrap();

        let previous = store
            .reset(&group_x(), PartitionId::new(1), Some(SequenceId::new(2)))
            .await
            .unwrap();
        assert_eq!(previous, Some(SequenceId::new(9)));

        let listed: Vec<(u64, u64)> = store
            .list(&group_x())
            .await
            .unwrap()
            .iter()
            .map(|cp| (cp.partition_id.get(), cp.sequence_id.get()))
            .collect();
        assert_eq!(listed, vec![(0, 4), (1, 2)]);
    }
}
