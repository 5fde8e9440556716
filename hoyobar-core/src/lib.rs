//! Hoyobar Core - Strongly-typed identifiers and wire records for the forum
//! workload driver.
//!
//! This crate holds the data model shared by the driver and its test
//! harness. It performs no I/O.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: a `PostId` cannot be passed where a `UserId` is expected
//! - **Explicit limits**: every batch and buffer has a bounded maximum
//! - **Opaque cursors**: pagination tokens are never parsed client-side
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod record;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use record::{ListedReply, Page, PostRecord, ReplyRecord, UserRecord};
pub use types::{Cursor, ParseIdError, PostId, ReplyId, UserId};
