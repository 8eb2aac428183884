//! Prometheus metrics exposition
//!
//! The library crates record through the `metrics` facade:
//!
//! - `channel_acks_total` (counter): label `code`
//! - `channel_messages_discarded_total` (counter): label `reason`
//! - `channel_reconnects_total` (counter): label `kind`
//! - `auth_token_refreshes_total` (counter): label `outcome`
//!
//! This module installs the recorder and serves the rendered text.

use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Router exposing `GET /metrics`.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(handle)
}

/// Prometheus text exposition format.
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
