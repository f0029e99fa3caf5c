//! hitmeter exporter library entry.
//!
//! This crate wires the metric registry, the result recorder, the exposition
//! listener and the lifecycle handle into one observer that a load generator
//! feeds with per-request results. It is consumed by the runner binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod lifecycle;
pub mod obs;
pub mod ops;
pub mod recorder;
pub mod router;
pub mod server;

pub use lifecycle::MetricsObserver;
pub use recorder::ResultRecorder;
