//! Relay Tests - cross-crate tests for the relay event log.
//!
//! Unit tests live next to the code in each crate. This crate holds the
//! tests that need the whole pipeline: a producer writing to the log, a
//! dispatcher reading it back, and a checkpoint store between runs.
//!
//! ## Test Organization
//!
//! - `pipeline_tests`: end-to-end scenarios (retry, dead letter, resync,
//!   throttling, restart)
//! - `property_tests`: seeded randomized runs checked against the
//!   invariants in `properties`
//!
//! **Support Modules**:
//! - `scenarios`: the `Pipeline` fixture, scripted handlers, seeds
//! - `properties`: ordering, round-trip and checkpoint invariant checkers
//!
//! ## Naming Conventions
//!
//! - Scenario tests: `test_<component>_<scenario>`
//! - Property tests: `test_property_<invariant>`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;

#[cfg(test)]
mod property_tests;
