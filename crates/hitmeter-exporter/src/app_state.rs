//! Shared state handed to the exposition handler.

use std::sync::Arc;

use crate::obs::MetricRegistry;

#[derive(Clone)]
pub struct ExporterState {
    registry: Arc<MetricRegistry>,
}

impl ExporterState {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }
}
