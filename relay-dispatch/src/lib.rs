//! Relay Dispatch - delivers partitioned records to a handler, at least once.
//!
//! A [`Dispatcher`] runs one [`PartitionWorker`] per partition. Each worker
//! reads a bounded batch from the log, hands it to the [`BatchHandler`],
//! and commits the batch's last sequence id as the group's checkpoint only
//! once the handler succeeds. A crash between delivery and commit means
//! redelivery, never loss.
//!
//! # Failure handling
//!
//! - Handler errors and timeouts are retried with backoff, up to
//!   `max_retries` times after the first attempt.
//! - When retries run out the batch is published to a [`DeadLetterSink`]
//!   and the partition halts. Other partitions keep running.
//! - A position below the purge horizon resyncs to the new log start, or
//!   halts if [`ExpiredPolicy::Halt`] is configured.
//!
//! Every outcome is reported to a [`DispatchObserver`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod dead_letter;
mod dispatcher;
mod error;
mod handler;
mod observer;
mod worker;

pub use config::{DispatcherConfig, ExpiredPolicy, StartPosition};
pub use dead_letter::{
    DeadLetter, DeadLetterRecord, DeadLetterSink, FileDeadLetterSink, MemoryDeadLetterSink,
};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::{DispatchError, DispatchResult};
pub use handler::{Batch, BatchHandler, DeliveredRecord, HandlerError, JsonLogHandler};
pub use observer::{
    BatchOutcome, DispatchEvent, DispatchObserver, FanoutObserver, RecordingObserver,
    TracingObserver,
};
pub use worker::{PartitionWorker, StepOutcome, WorkerContext, WorkerState};
