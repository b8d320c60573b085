//! Per-client token-bucket rate limiting.
//!
//! The client key is the caller's bearer token when present, `"anonymous"`
//! otherwise. Buckets refill continuously at `RATE_LIMIT_RPS` up to
//! `RATE_LIMIT_BURST`; an empty bucket earns RateLimit (1008) / HTTP 429.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use taskflow_core::{ErrorCode, TaskError};

use crate::error::ApiError;
use crate::state::AppState;

const ANONYMOUS_KEY: &str = "anonymous";

struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Token buckets keyed by client identity.
pub struct TokenBucketLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    refill_rate: f64,
    burst: f64,
}

impl TokenBucketLimiter {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            refill_rate: requests_per_second,
            burst: f64::from(burst),
        }
    }

    /// Take one token for `key`; returns false when the bucket is empty.
    pub fn allow(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let bucket = buckets.entry(key.to_owned()).or_insert_with(|| Bucket {
            tokens: self.burst,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.burst);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

fn client_key(headers: &HeaderMap) -> String {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or(ANONYMOUS_KEY)
        .to_owned()
}

pub async fn ratelimit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let key = client_key(req.headers());
    if state.limiter.allow(&key) {
        next.run(req).await
    } else {
        ApiError(TaskError::new(ErrorCode::RateLimit)).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn burst_then_deny() {
        let limiter = TokenBucketLimiter::new(0.000001, 2);
        assert!(limiter.allow("c"));
        assert!(limiter.allow("c"));
        assert!(!limiter.allow("c"), "bucket exhausted");
    }

    #[test]
    fn clients_have_independent_buckets() {
        let limiter = TokenBucketLimiter::new(0.000001, 1);
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"), "b has its own bucket");
    }

    #[test]
    fn bucket_refills_over_time() {
        let limiter = TokenBucketLimiter::new(1000.0, 1);
        assert!(limiter.allow("c"));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(limiter.allow("c"), "10ms at 1000 rps refills the bucket");
    }

    #[test]
    fn key_prefers_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "anonymous");
        headers.insert(AUTHORIZATION, "Bearer secret-1".parse().unwrap());
        assert_eq!(client_key(&headers), "secret-1");
    }
}
