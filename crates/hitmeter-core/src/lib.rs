//! hitmeter core: the error surface and the result record consumed by the
//! metrics observer.
//!
//! This crate carries no runtime or HTTP dependencies so the load generator
//! side can depend on it without pulling in the exporter stack.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. All fallible paths
//! surface as `HitmeterError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod record;

/// Shared result type.
pub use error::{ErrorCode, HitmeterError, Result};
pub use record::ResultRecord;
