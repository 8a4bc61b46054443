//! Invariant checkers for relay tests.
//!
//! Each checker returns every violation it finds rather than stopping at
//! the first, so a failing seed reports the whole picture.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use relay_core::{PartitionId, SequenceId};

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// Sequence ids within a partition did not strictly increase.
    OutOfOrder {
        /// The partition.
        partition_id: PartitionId,
        /// The earlier sequence id.
        previous: SequenceId,
        /// The sequence id that followed it.
        next: SequenceId,
    },
    /// A sequence id was skipped.
    Gap {
        /// The partition.
        partition_id: PartitionId,
        /// The sequence id that was expected.
        expected: SequenceId,
        /// The sequence id that was seen.
        actual: SequenceId,
    },
    /// A delivered payload differs from what was produced.
    PayloadMismatch {
        /// The partition.
        partition_id: PartitionId,
        /// Where the payloads differ.
        sequence_id: SequenceId,
    },
    /// A produced record was never delivered.
    Missing {
        /// The partition.
        partition_id: PartitionId,
        /// The record.
        sequence_id: SequenceId,
    },
    /// A checkpoint moved backward.
    CheckpointRegressed {
        /// The partition.
        partition_id: PartitionId,
        /// The earlier checkpoint.
        previous: SequenceId,
        /// The later, lower checkpoint.
        next: SequenceId,
    },
}

impl fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder {
                partition_id,
                previous,
                next,
            } => write!(f, "{partition_id}: {next} delivered after {previous}"),
            Self::Gap {
                partition_id,
                expected,
                actual,
            } => write!(f, "{partition_id}: expected {expected}, saw {actual}"),
            Self::PayloadMismatch {
                partition_id,
                sequence_id,
            } => write!(f, "{partition_id}: payload mismatch at {sequence_id}"),
            Self::Missing {
                partition_id,
                sequence_id,
            } => write!(f, "{partition_id}: {sequence_id} never delivered"),
            Self::CheckpointRegressed {
                partition_id,
                previous,
                next,
            } => write!(f, "{partition_id}: checkpoint went from {previous} to {next}"),
        }
    }
}

/// Checks that each partition's sequence ids strictly increase, with no
/// gaps, in the order given.
#[must_use]
pub fn check_partition_order(
    records: &[(PartitionId, SequenceId, Bytes)],
) -> Vec<PropertyViolation> {
    let mut violations = Vec::new();
    let mut last: BTreeMap<PartitionId, SequenceId> = BTreeMap::new();

    for (partition_id, sequence_id, _) in records {
        if let Some(previous) = last.get(partition_id) {
            if sequence_id <= previous {
                violations.push(PropertyViolation::OutOfOrder {
                    partition_id: *partition_id,
                    previous: *previous,
                    next: *sequence_id,
                });
            } else if *sequence_id != previous.next() {
                violations.push(PropertyViolation::Gap {
                    partition_id: *partition_id,
                    expected: previous.next(),
                    actual: *sequence_id,
                });
            }
        }
        last.insert(*partition_id, *sequence_id);
    }
    violations
}

/// Checks that every produced record was delivered with the same bytes.
///
/// `produced` maps each record's position to its payload; `delivered` is
/// what the handler saw, possibly with redeliveries.
#[must_use]
pub fn check_round_trip(
    produced: &BTreeMap<(PartitionId, SequenceId), Bytes>,
    delivered: &[(PartitionId, SequenceId, Bytes)],
) -> Vec<PropertyViolation> {
    let mut violations = Vec::new();
    let mut seen: BTreeMap<(PartitionId, SequenceId), &Bytes> = BTreeMap::new();
    for (partition_id, sequence_id, payload) in delivered {
        seen.insert((*partition_id, *sequence_id), payload);
    }

    for (&(partition_id, sequence_id), payload) in produced {
        match seen.get(&(partition_id, sequence_id)) {
            None => violations.push(PropertyViolation::Missing {
                partition_id,
                sequence_id,
            }),
            Some(delivered) if *delivered != payload => {
                violations.push(PropertyViolation::PayloadMismatch {
                    partition_id,
                    sequence_id,
                });
            }
            Some(_) => {}
        }
    }
    violations
}

/// Checks that a series of observed checkpoints never decreases.
#[must_use]
pub fn check_checkpoint_monotonic(
    partition_id: PartitionId,
    observed: &[Option<SequenceId>],
) -> Vec<PropertyViolation> {
    observed
        .windows(2)
        .filter_map(|pair| match (pair[0], pair[1]) {
            (Some(previous), Some(next)) if next < previous => {
                Some(PropertyViolation::CheckpointRegressed {
                    partition_id,
                    previous,
                    next,
                })
            }
            (Some(previous), None) => Some(PropertyViolation::CheckpointRegressed {
                partition_id,
                previous,
                next: SequenceId::earliest(),
            }),
            _ => None,
        })
        .collect()
}
