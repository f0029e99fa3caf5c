//! Axum router wiring.
//!
//! Exposes the registry at a single configurable path.

use axum::{routing::get, Router};

use crate::{app_state::ExporterState, ops};

pub fn build_router(state: ExporterState, path: &str) -> Router {
    Router::new()
        .route(path, get(ops::metrics))
        .with_state(state)
}
