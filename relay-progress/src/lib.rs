//! Consumer checkpoint tracking for Relay.
//!
//! A checkpoint is the highest sequence id a consumer group has fully
//! processed on a partition. Checkpoints only move forward on commit;
//! committing the same or a lower sequence id is a no-op. An explicit
//! operator `reset` is the only way to move one backward.
//!
//! # Stores
//!
//! - [`SimulatedCheckpointStore`]: in-memory, with deterministic fault
//!   injection for simulation tests.
//! - [`FileCheckpointStore`]: a JSON file replaced atomically on every
//!   change.
//!
//! # Example
//!
//! ```ignore
//! use relay_progress::{CheckpointStore, SimulatedCheckpointStore};
//!
//! let store = SimulatedCheckpointStore::new(42);
//! store.commit(&group, PartitionId::new(0), SequenceId::new(1)).await?;
//! store.commit(&group, PartitionId::new(0), SequenceId::new(0)).await?; // no-op
//! assert_eq!(store.get(&group, PartitionId::new(0)).await?, Some(SequenceId::new(1)));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod file;
mod storage;
mod types;

pub use error::{ProgressError, ProgressResult};
pub use file::{FileCheckpointConfig, FileCheckpointStore};
pub use storage::{CheckpointFaultConfig, CheckpointStore, SimulatedCheckpointStore};
pub use types::{Checkpoint, CheckpointTable, CommitOutcome};
