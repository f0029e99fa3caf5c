//! hitmeter exporter runner.
//!
//! - Loads the YAML config given as first argument (defaults otherwise)
//! - Serves the metrics endpoint
//! - Feeds newline-delimited JSON result records from stdin into the observer
//! - Keeps serving after stdin EOF until SIGINT/SIGTERM, then closes

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use hitmeter_core::{HitmeterError, ResultRecord};
use hitmeter_exporter::{config, MetricsObserver, ResultRecorder};

#[tokio::main]
async fn main() -> Result<(), HitmeterError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => config::load_from_file(&path)?,
        None => config::ExporterConfig::default(),
    };

    let observer = MetricsObserver::start(&cfg).await?;
    tracing::info!(url = %observer.metrics_url(), "hitmeter-exporter started");

    let feed = tokio::spawn(feed_stdin(observer.recorder()));

    shutdown_signal().await;
    feed.abort();
    observer.close().await
}

async fn feed_stdin(recorder: ResultRecorder) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut observed: u64 = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match ResultRecord::from_json(&line) {
                    Ok(res) => {
                        recorder.observe(&res);
                        observed += 1;
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping malformed result line"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
    tracing::info!(observed, "result stream ended, still serving until signalled");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, starting graceful shutdown");
}
