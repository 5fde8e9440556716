//! Hoyobar Tests - end-to-end simulation testing for the workload driver.
//!
//! This crate runs the full pipeline (generator, dispatcher, orchestrator,
//! verifier) against an in-memory forum server with fault injection.
//!
//! ## Test Organization
//!
//! **Simulation Tests** (`*_tests.rs`): pipeline against [`SimulatedForum`]
//! - `dispatcher_tests`: batching, concurrency ceiling, completion accounting
//! - `orchestrator_tests`: stage sequencing, failure policies, shortfall
//! - `verification_tests`: ordering and reply-recency checks, cursor contract
//!
//! **Support Modules**:
//! - `simulated_forum`: in-memory server implementing `ApiExecutor`
//! - `properties`: laws every run must satisfy
//! - `scenarios`: reusable fault patterns and run settings
//!
//! ## Naming Conventions
//!
//! - Simulation tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`
//!
//! [`SimulatedForum`]: simulated_forum::SimulatedForum

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;
pub mod simulated_forum;

#[cfg(test)]
mod verification_tests;
