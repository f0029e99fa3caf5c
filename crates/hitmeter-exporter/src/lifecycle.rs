//! One handle over registry + instruments + listener.
//!
//! `start` validates the config, creates the registry and the request
//! instruments, then binds the listener. If binding fails the instruments
//! are unregistered before the error is returned, so a failed start leaves
//! nothing behind. `close` always attempts both the listener shutdown and
//! the unregister step and reports every error it collects.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use hitmeter_core::error::{HitmeterError, Result};
use hitmeter_core::ResultRecord;

use crate::app_state::ExporterState;
use crate::config::ExporterConfig;
use crate::obs::MetricRegistry;
use crate::recorder::ResultRecorder;
use crate::router::build_router;
use crate::server::ExpositionServer;

pub struct MetricsObserver {
    registry: Arc<MetricRegistry>,
    recorder: ResultRecorder,
    local_addr: SocketAddr,
    path: String,
    server: Mutex<Option<ExpositionServer>>,
}

impl MetricsObserver {
    /// Same as [`MetricsObserver::start`] with the default config
    /// (`0.0.0.0:8880`, metrics at `/`).
    pub async fn start_default() -> Result<Self> {
        Self::start(&ExporterConfig::default()).await
    }

    pub async fn start(cfg: &ExporterConfig) -> Result<Self> {
        cfg.validate()?;
        let addr = cfg.exporter.bind_address()?;

        let registry = Arc::new(MetricRegistry::new());
        let recorder = ResultRecorder::install(Arc::clone(&registry), &cfg.exporter.buckets)?;

        let router = build_router(ExporterState::new(Arc::clone(&registry)), &addr.path);
        let grace = cfg.exporter.shutdown_grace();
        let server = match ExpositionServer::bind(&addr, router, grace).await {
            Ok(s) => s,
            Err(e) => {
                registry.unregister_all();
                return Err(e);
            }
        };

        Ok(Self {
            local_addr: server.local_addr(),
            path: addr.path,
            registry,
            recorder,
            server: Mutex::new(Some(server)),
        })
    }

    /// Record one hit. Never fails and never blocks on I/O.
    pub fn observe(&self, res: &ResultRecord) {
        self.recorder.observe(res);
    }

    /// A cheap clone for producer tasks.
    pub fn recorder(&self) -> ResultRecorder {
        self.recorder.clone()
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metrics_url(&self) -> String {
        format!("http://{}{}", self.local_addr, self.path)
    }

    /// Shut the listener down and unregister every instrument. Later calls
    /// return `AlreadyClosed`.
    pub async fn close(&self) -> Result<()> {
        let Some(mut server) = self.server.lock().await.take() else {
            return Err(HitmeterError::AlreadyClosed);
        };

        let mut errs = Vec::new();
        if let Err(e) = server.shutdown().await {
            errs.push(e);
        }
        self.registry.unregister_all();
        HitmeterError::collect(errs)
    }
}
