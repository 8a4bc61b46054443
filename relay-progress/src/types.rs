//! Checkpoint types.
//!
//! A checkpoint records the highest sequence id a consumer group has fully
//! processed on one partition. Dispatch resumes at the record after it.

use std::collections::BTreeMap;

use relay_core::{ConsumerGroup, PartitionId, SequenceId, Timestamp};
use serde::{Deserialize, Serialize};

/// A committed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Consumer group owning the checkpoint.
    pub group: ConsumerGroup,
    /// Partition the checkpoint tracks.
    pub partition_id: PartitionId,
    /// Highest processed sequence id.
    pub sequence_id: SequenceId,
    /// When the checkpoint last changed.
    pub updated_at: Timestamp,
}

impl Checkpoint {
    /// Returns the first sequence id not yet processed.
    #[must_use]
    pub const fn resume_from(&self) -> SequenceId {
        self.sequence_id.next()
    }
}

/// Result of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The checkpoint moved forward.
    Advanced {
        /// The checkpoint before the commit, if there was one.
        previous: Option<SequenceId>,
    },
    /// The commit was at or below the current checkpoint and was ignored.
    Unchanged {
        /// The checkpoint that stays in place.
        current: SequenceId,
    },
}

impl CommitOutcome {
    /// Returns true if the checkpoint moved.
    #[must_use]
    pub const fn advanced(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

/// In-memory checkpoint table with monotonic commit semantics.
///
/// Shared by every store implementation so the rules live in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointTable {
    entries: BTreeMap<(ConsumerGroup, PartitionId), Checkpoint>,
}

impl CheckpointTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from stored checkpoints. Later duplicates win.
    #[must_use]
    pub fn from_checkpoints(checkpoints: Vec<Checkpoint>) -> Self {
        let entries = checkpoints
            .into_iter()
            .map(|cp| ((cp.group.clone(), cp.partition_id), cp))
            .collect();
        Self { entries }
    }

    /// Returns every checkpoint, ordered by group then partition.
    #[must_use]
    pub fn to_checkpoints(&self) -> Vec<Checkpoint> {
        self.entries.values().cloned().collect()
    }

    /// Returns the number of checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advances a checkpoint. Commits at or below the current value are
    /// no-ops.
    pub fn commit(
        &mut self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
        sequence_id: SequenceId,
        now: Timestamp,
    ) -> CommitOutcome {
        let key = (group.clone(), partition_id);
        let previous = self.entries.get(&key).map(|cp| cp.sequence_id);
        if let Some(current) = previous {
            if sequence_id <= current {
                return CommitOutcome::Unchanged { current };
            }
        }

        self.entries.insert(
            key,
            Checkpoint {
                group: group.clone(),
                partition_id,
                sequence_id,
                updated_at: now,
            },
        );
        CommitOutcome::Advanced { previous }
    }

    /// Returns the committed sequence id.
    #[must_use]
    pub fn get(&self, group: &ConsumerGroup, partition_id: PartitionId) -> Option<SequenceId> {
        self.entries
            .get(&(group.clone(), partition_id))
            .map(|cp| cp.sequence_id)
    }

    /// Overwrites or clears a checkpoint, ignoring monotonicity.
    /// Returns the previous value.
    pub fn reset(
        &mut self,
        group: &ConsumerGroup,
        partition_id: PartitionId,
        sequence_id: Option<SequenceId>,
        now: Timestamp,
    ) -> Option<SequenceId> {
        let key = (group.clone(), partition_id);
        let previous = match sequence_id {
            Some(sequence_id) => self.entries.insert(
                key,
                Checkpoint {
                    group: group.clone(),
                    partition_id,
                    sequence_id,
                    updated_at: now,
                },
            ),
            None => self.entries.remove(&key),
        };
        previous.map(|cp| cp.sequence_id)
    }

    /// Returns the checkpoints of one group, ordered by partition.
    #[must_use]
    pub fn list(&self, group: &ConsumerGroup) -> Vec<Checkpoint> {
        self.entries
            .values()
            .filter(|cp| &cp.group == group)
            .cloned()
            .collect()
    }
}
