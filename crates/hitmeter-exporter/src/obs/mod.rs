//! In-process metric instruments.
//!
//! Counters and histograms are stored as atomics/short-locked cells and
//! rendered by the exposition handler on every scrape.

pub mod metrics;

pub use metrics::{CounterVec, HistogramSnapshot, HistogramVec, MetricRegistry};
