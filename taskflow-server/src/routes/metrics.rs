//! Prometheus text-format metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_metrics))]
pub struct MetricsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(get_metrics))
}

/// Metrics in the Prometheus text exposition format.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "ops",
    responses(
        (status = 200, description = "Prometheus text metrics", body = String)
    )
)]
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = crate::metrics::global().render(state.service.bus().dropped());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
