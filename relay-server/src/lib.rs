//! Relay server.
//!
//! This crate exposes the relay over HTTP: an ingest API that routes
//! records through the producer, and read-only endpoints for checkpoints
//! and partition metadata. It also owns the configuration file format and
//! the background tasks (retention, consumer dispatcher) run by the
//! `relay-server` binary.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
mod error;
pub mod http;
mod service;
pub mod tasks;

pub use config::RelayConfig;
pub use error::{ServerError, ServerResult};
pub use http::router;
pub use service::RelayService;
