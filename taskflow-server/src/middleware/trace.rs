//! Per-request tracing.
//!
//! Honors an incoming `x-request-id` (when it parses as a UUID) or mints a
//! fresh one, wraps the request in a span carrying id/method/path, and logs
//! the status and latency on completion. Bodies are never buffered, so the
//! streaming endpoints pass through untouched.

use std::time::Instant;

use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::metrics::{self, Metrics};

pub static X_REQUEST_ID: &str = "x-request-id";

pub async fn trace_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    Metrics::inc(&metrics::global().http_requests);

    let span = info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    // A UUID is always a valid header value; fall back to omitting it.
    let id_value = HeaderValue::from_str(&request_id.to_string()).ok();

    async move {
        debug!("request started");

        let mut req = req;
        if let Some(value) = &id_value {
            req.headers_mut().insert(X_REQUEST_ID, value.clone());
        }

        let mut response = next.run(req).await;

        if let Some(value) = id_value {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "request finished"
        );

        response
    }
    .instrument(span)
    .await
}
