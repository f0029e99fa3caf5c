//! Exposition listener lifecycle.
//!
//! `Unbound -> Bound -> Serving -> ShuttingDown -> Closed`. Binding happens
//! on the caller's task so a bind failure surfaces synchronously. Accepting
//! runs on a spawned task that owns every connection in a `JoinSet`, so a
//! shutdown that outlives the grace period can tear all of them down.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use hitmeter_core::error::{HitmeterError, Result};

use crate::config::BindAddress;

/// Upper bound on waiting for the accept task once connections were aborted.
const FORCE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unbound,
    Bound,
    Serving,
    ShuttingDown,
    Closed,
}

pub struct ExpositionServer {
    local_addr: SocketAddr,
    grace: Duration,
    state: ServerState,
    /// Stop accepting and ask open connections to finish.
    drain: CancellationToken,
    /// Abort whatever is still open.
    force: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

async fn bind_first(addrs: &[SocketAddr]) -> io::Result<TcpListener> {
    let mut last = None;
    for a in addrs {
        match TcpListener::bind(*a).await {
            Ok(l) => return Ok(l),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to bind")
    }))
}

/// Accept loop. Returns once every connection has finished, or was aborted
/// after `force` fired.
async fn serve(
    listener: TcpListener,
    router: Router,
    drain: CancellationToken,
    force: CancellationToken,
) {
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            _ = drain.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(%peer, "scrape connection");
                    conns.spawn(serve_connection(stream, router.clone(), drain.clone()));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
        }
    }
    // Release the port before draining.
    drop(listener);

    let forced = loop {
        tokio::select! {
            joined = conns.join_next() => {
                if joined.is_none() {
                    break false;
                }
            }
            _ = force.cancelled() => break true,
        }
    };
    if forced {
        tracing::debug!(open = conns.len(), "aborting scrape connections");
        conns.abort_all();
        while conns.join_next().await.is_some() {}
    }
}

async fn serve_connection(stream: TcpStream, router: Router, drain: CancellationToken) {
    let io = TokioIo::new(stream);
    let svc = TowerToHyperService::new(router);
    let conn = http1::Builder::new().serve_connection(io, svc);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        _ = drain.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = res {
        tracing::debug!(error = %e, "scrape connection ended with error");
    }
}

impl ExpositionServer {
    /// Bind `addr` and start serving `router` in the background. Returns as
    /// soon as the socket is bound; does not wait for a first request.
    pub async fn bind(addr: &BindAddress, router: Router, grace: Duration) -> Result<Self> {
        let candidates = addr.resolve().await?;
        let bind_err = |source: io::Error| HitmeterError::Bind { addr: addr.authority(), source };
        let listener = bind_first(&candidates).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let mut server = Self {
            local_addr,
            grace,
            state: ServerState::Unbound,
            drain: CancellationToken::new(),
            force: CancellationToken::new(),
            handle: None,
        };
        server.transition(ServerState::Bound);

        let handle = tokio::spawn(serve(
            listener,
            router,
            server.drain.clone(),
            server.force.clone(),
        ));
        server.handle = Some(handle);
        server.transition(ServerState::Serving);

        tracing::info!(%local_addr, path = %addr.path, "metrics endpoint listening");
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    fn transition(&mut self, next: ServerState) {
        tracing::debug!(
            from = ?self.state,
            to = ?next,
            addr = %self.local_addr,
            "exposition state"
        );
        self.state = next;
    }

    /// Stop accepting, let in-flight scrapes finish within the grace period,
    /// then release the socket. Connections still open after the grace
    /// period are closed without a response. A second call returns
    /// `AlreadyClosed`.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Err(HitmeterError::AlreadyClosed);
        };
        self.transition(ServerState::ShuttingDown);
        self.drain.cancel();

        let outcome = match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HitmeterError::Shutdown(format!("listener task failed: {e}"))),
            Err(_) => {
                tracing::warn!(
                    addr = %self.local_addr,
                    grace = ?self.grace,
                    "scrapes still in flight, closing connections"
                );
                self.force.cancel();
                if tokio::time::timeout(FORCE_WAIT, &mut handle).await.is_err() {
                    handle.abort();
                    let _ = handle.await;
                }
                Err(HitmeterError::ShutdownTimeout(self.grace))
            }
        };

        self.transition(ServerState::Closed);
        tracing::info!(addr = %self.local_addr, "metrics endpoint closed");
        outcome
    }
}

impl Drop for ExpositionServer {
    fn drop(&mut self) {
        self.drain.cancel();
        self.force.cancel();
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                // Dropping the task drops its JoinSet, which aborts the connections.
                handle.abort();
            }
        }
    }
}
