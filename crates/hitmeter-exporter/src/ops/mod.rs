//! Exposition HTTP endpoint.
//!
//! - `GET <path>` : Prometheus text format (0.0.4)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::app_state::ExporterState;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn metrics(State(state): State<ExporterState>) -> Response {
    match state.registry().render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            // Only this scrape fails; the accept loop keeps running.
            tracing::warn!(error = %e, "metrics render failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}: {e}", e.code().as_str()),
            )
                .into_response()
        }
    }
}
