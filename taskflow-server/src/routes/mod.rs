//! Router construction.
//!
//! Two routers back the two listeners:
//! - [`build_api`] (the `GRPC_PORT` listener): the full task API under
//!   `/api/v1`: unary CRUD behind the per-request deadline, the three
//!   streaming endpoints outside it (streams run until one side closes),
//!   plus the greeter demo and optional Swagger UI. Guarded by panic
//!   recovery, tracing, auth, rate limiting, CORS and a global concurrency
//!   cap.
//! - [`build_mirror`] (the `HTTP_PORT` listener): `/health`, `/metrics`
//!   and a JSON mirror of the unary task routes.

mod batch;
pub mod doc;
pub mod greeter;
mod health;
mod metrics;
mod tasks;
mod updates;
mod watch;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::Router;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::internal_error_response;
use crate::middleware::{auth, cors, ratelimit, timeout, trace};
use crate::state::AppState;

pub use watch::WATCH_INITIAL_LIMIT;

/// Build the task API router for the `GRPC_PORT` listener.
pub fn build_api(state: Arc<AppState>) -> Router {
    let unary = Router::new()
        .merge(tasks::router())
        .merge(greeter::router())
        .layer(from_fn_with_state(
            state.clone(),
            timeout::timeout_middleware,
        ));

    let streaming = Router::new()
        .merge(watch::router())
        .merge(batch::router())
        .merge(updates::router());

    let mut app = Router::new().nest("/api/v1", unary.merge(streaming));

    // Enabled by default; disable with ENABLE_SWAGGER=false in production to
    // avoid exposing the API structure.
    if state.config.enable_swagger {
        app = app.merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()),
        );
    }

    app.layer(
        // Outermost layers execute first on the way in. CORS sits outside
        // auth so preflight requests are answered without credentials.
        ServiceBuilder::new()
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(from_fn(trace::trace_middleware))
            .layer(cors::cors_layer(state.clone()))
            .layer(from_fn_with_state(state.clone(), auth::auth_middleware))
            .layer(from_fn_with_state(
                state.clone(),
                ratelimit::ratelimit_middleware,
            ))
            .layer(GlobalConcurrencyLimitLayer::new(
                state.config.max_connections as usize,
            )),
    )
    .with_state(state)
}

/// Build the ops/mirror router for the `HTTP_PORT` listener.
pub fn build_mirror(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .nest("/api/v1", tasks::router())
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(from_fn(trace::trace_middleware)),
        )
        .with_state(state)
}

/// Boundary recover: a panicking handler becomes Unknown (1000) / HTTP 500
/// instead of tearing down the connection.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_owned()
    } else {
        "handler panicked".to_owned()
    };
    error!(%detail, "recovered panic in handler");
    internal_error_response(detail)
}
