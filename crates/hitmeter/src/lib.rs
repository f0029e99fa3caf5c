//! Top-level facade crate for hitmeter.
//!
//! Re-exports core types and the exporter library so users can depend on a single crate.

pub mod core {
    pub use hitmeter_core::*;
}

pub mod exporter {
    pub use hitmeter_exporter::*;
}

pub use hitmeter_core::{HitmeterError, ResultRecord};
pub use hitmeter_exporter::MetricsObserver;
