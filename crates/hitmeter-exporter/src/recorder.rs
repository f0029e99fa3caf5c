//! Maps one result record onto the registry.
//!
//! Recording is fire-and-forget: registry errors are logged and dropped so
//! the load-generation path never fails or waits because of metrics.

use std::sync::Arc;

use hitmeter_core::error::Result;
use hitmeter_core::ResultRecord;

use crate::obs::MetricRegistry;

pub const REQUEST_SECONDS: &str = "request_seconds";
pub const REQUEST_BYTES_IN: &str = "request_bytes_in";
pub const REQUEST_BYTES_OUT: &str = "request_bytes_out";
pub const REQUEST_FAIL_COUNT: &str = "request_fail_count";

/// Latency buckets in seconds.
pub const DEFAULT_BUCKETS: [f64; 9] = [0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0];

const HIT_LABELS: [&str; 3] = ["method", "url", "status"];
const FAIL_LABELS: [&str; 3] = ["method", "url", "message"];

#[derive(Clone)]
pub struct ResultRecorder {
    registry: Arc<MetricRegistry>,
}

impl ResultRecorder {
    /// Create the four request instruments on `registry`.
    pub fn install(registry: Arc<MetricRegistry>, buckets: &[f64]) -> Result<Self> {
        registry.create_histogram(REQUEST_SECONDS, "Request latency", &HIT_LABELS, buckets)?;
        registry.create_counter(
            REQUEST_BYTES_IN,
            "Bytes received from servers as response to requests",
            &HIT_LABELS,
        )?;
        registry.create_counter(
            REQUEST_BYTES_OUT,
            "Bytes sent to servers during requests",
            &HIT_LABELS,
        )?;
        registry.create_counter(
            REQUEST_FAIL_COUNT,
            "Internal failures that prevented a hit to the target server",
            &FAIL_LABELS,
        )?;
        Ok(Self { registry })
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Record one hit.
    pub fn observe(&self, res: &ResultRecord) {
        let code = res.code.to_string();
        let labels = [res.method.as_str(), res.url.as_str(), code.as_str()];

        let outcomes = [
            self.registry.increment_counter(REQUEST_BYTES_IN, &labels, res.bytes_in),
            self.registry.increment_counter(REQUEST_BYTES_OUT, &labels, res.bytes_out),
            self.registry
                .observe_histogram(REQUEST_SECONDS, &labels, res.latency.as_secs_f64()),
        ];
        for outcome in outcomes {
            if let Err(e) = outcome {
                tracing::debug!(error = %e, method = %res.method, url = %res.url, "sample dropped");
            }
        }

        if res.is_failure() {
            let labels = [res.method.as_str(), res.url.as_str(), res.error.as_str()];
            if let Err(e) = self.registry.increment_counter(REQUEST_FAIL_COUNT, &labels, 1) {
                tracing::debug!(
                    error = %e,
                    method = %res.method,
                    url = %res.url,
                    "failure sample dropped"
                );
            }
        }
    }
}
