//! Hoyobar Workload: bounded-concurrency batch driver for the forum API
//!
//! Generates large volumes of causally dependent requests (register user →
//! create post → reply to post), sends them with a fixed concurrency ceiling,
//! counts per-stage successes and failures, and optionally replays the
//! paginated list endpoints to check that the server's ordering matches the
//! order the client created records in.
//!
//! # Architecture
//!
//! - **Task generation** is pure: a seeded generator turns counts and earlier
//!   records into request descriptors without touching the network.
//! - **Dispatch** is bounded: descriptors run in contiguous batches, at most
//!   `concurrency` in flight, and completions stream back tagged with their slot.
//! - **Orchestration** threads records between stages, keeps a creation
//!   ledger, and runs the verification checks.
//!
//! The same pipeline runs against a real server ([`HttpExecutor`]) or any
//! other [`ApiExecutor`], such as an in-memory simulation.
//!
//! # Example
//!
//! ```ignore
//! use hoyobar_workload::{config::load_profile, HttpExecutor, Orchestrator};
//!
//! let config = load_profile("smoke")?;
//! let executor = HttpExecutor::builder()
//!     .base_url(&config.server.base_url)
//!     .request_timeout(config.request_timeout())
//!     .build()?;
//!
//! let mut orchestrator = Orchestrator::from_config(executor, &config)?;
//! let summary = orchestrator.run().await?;
//! summary.print_summary();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod descriptor;
mod dispatcher;
mod generator;
mod ledger;
mod orchestrator;
mod payload;
mod report;
mod verification;

pub mod config;
pub mod executor;

pub use descriptor::{
    Completion, Endpoint, Failure, FailureKind, Fields, Method, Outcome, RequestDescriptor, Stage, Timestamp,
};
pub use dispatcher::{partition_batches, DispatchCounters, DispatchProgress, Dispatcher};
pub use generator::{ReplyRange, TaskGenerator};
pub use ledger::{CreationLedger, Reservation};
pub use orchestrator::{FailureMode, Orchestrator, PostPlan, RunSettings, StageResult, WorkloadError};
pub use payload::{
    truncate_chars, PayloadSource, SyntheticPayloads, DEFAULT_PASSWORD, DEFAULT_VCODE, USERNAME_PREFIX,
};
pub use report::{latency_histogram, FailureSample, RunSummary, Shortfall, StageReport, VerificationSummary};
pub use verification::{
    verify_login, verify_ordering, verify_reply_recency, ListOrder, ListedRecord, OrderingVerifier, PageFetcher,
    PostListFetcher, ReplyListFetcher, VerifyReport, VerifyState, Violation,
};

// Re-export executor and config types.
pub use config::{builtin_profiles, list_profiles, load_profile, ConfigError, DriverConfig};
pub use executor::{
    classify_response, ApiExecutor, ExecutorError, HttpExecutor, HttpExecutorBuilder, HttpExecutorConfig,
    AUTH_HEADER, DEFAULT_BASE_URL, ECODE_NO_MORE_ENTRIES, ECODE_OK,
};
