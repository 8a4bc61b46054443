//! Relay Partition - the partitioned record log and its producer client.
//!
//! This crate provides the write side of Relay: an append-only log split
//! into a fixed number of partitions, and a producer that routes records to
//! partitions by key and retries when the log pushes back.
//!
//! # Design
//!
//! A partition consists of:
//! - One or more segments (CRC-checked frames with a sparse index)
//! - A purge horizon (`log_start`) advanced only by retention
//! - An optional token bucket that throttles appends
//!
//! # Operations
//!
//! - `append` / `append_batch`: add records to the end of a partition
//! - `read` / `cursor`: fetch records starting from a sequence id
//! - `enforce_retention` / `purge_before`: drop old segments
//! - `Producer::send` / `Producer::send_batch`: keyed, retried appends

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod partition;
pub mod partitioner;
mod producer;
mod segment;
mod store;
mod throttle;

pub use error::{PartitionError, PartitionResult};
pub use partition::{Partition, PartitionMetadata, RetentionPolicy};
pub use producer::{OutgoingRecord, Produced, Producer, ProducerConfig};
pub use segment::{Segment, SegmentConfig, SegmentReader};
pub use store::{LogFaultConfig, LogStore, LogStoreConfig, RecordCursor, CURSOR_CHUNK_RECORDS_DEFAULT};
pub use throttle::{Refusal, TokenBucket, TokenBucketConfig};
