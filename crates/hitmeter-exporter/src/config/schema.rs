use std::time::Duration;

use serde::Deserialize;
use hitmeter_core::error::{HitmeterError, Result};

use super::address::{valid_route, BindAddress};
use crate::obs::metrics::normalize_buckets;
use crate::recorder::DEFAULT_BUCKETS;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    pub version: u32,

    #[serde(default)]
    pub exporter: ExporterSection,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self { version: 1, exporter: ExporterSection::default() }
    }
}

impl ExporterConfig {
    /// Default config bound to `bind` (e.g. `"127.0.0.1:0"` in tests).
    pub fn with_bind(bind: impl Into<String>) -> Self {
        Self {
            version: 1,
            exporter: ExporterSection { bind: bind.into(), ..ExporterSection::default() },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(HitmeterError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.exporter.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterSection {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Overrides a path carried by `bind`.
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "default_buckets")]
    pub buckets: Vec<f64>,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ExporterSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: None,
            buckets: default_buckets(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ExporterSection {
    pub fn validate(&self) -> Result<()> {
        BindAddress::parse(&self.bind)?;
        if let Some(p) = &self.path {
            if !valid_route(p) {
                return Err(HitmeterError::Config(format!(
                    "exporter.path must be a literal route starting with '/': {p:?}"
                )));
            }
        }
        normalize_buckets(&self.buckets)
            .map_err(|e| HitmeterError::Config(format!("exporter.buckets: {e}")))?;
        if !(1..=60000).contains(&self.shutdown_grace_ms) {
            return Err(HitmeterError::Config(
                "exporter.shutdown_grace_ms must be between 1 and 60000".into(),
            ));
        }
        Ok(())
    }

    /// Bind address with the effective metrics path applied.
    pub fn bind_address(&self) -> Result<BindAddress> {
        let mut addr = BindAddress::parse(&self.bind)?;
        if let Some(p) = &self.path {
            addr.path = p.clone();
        }
        Ok(addr)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_bind() -> String {
    "0.0.0.0:8880".into()
}
fn default_buckets() -> Vec<f64> {
    DEFAULT_BUCKETS.to_vec()
}
fn default_shutdown_grace_ms() -> u64 {
    5000
}
