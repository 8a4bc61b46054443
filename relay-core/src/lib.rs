//! Relay Core - Strongly-typed identifiers, records and shared policy for Relay.
//!
//! This crate holds the vocabulary every other Relay crate speaks: partition
//! and sequence identifiers, the immutable [`Record`], the error taxonomy
//! ([`ErrorKind`]), system [`Limits`], and the [`RetryPolicy`] used by both
//! the producer and the consumer dispatcher.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `PartitionId` with a `SequenceId`
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **Typed failures**: Every error maps onto one [`ErrorKind`]
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod limits;
mod record;
mod retry;
mod types;

pub use error::{Error, ErrorKind, Result};
pub use limits::Limits;
pub use record::{Record, SequenceId, Timestamp};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use types::{ConsumerGroup, PartitionId};
