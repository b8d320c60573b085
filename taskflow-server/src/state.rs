//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::db::SqliteStore;
use crate::middleware::ratelimit::TokenBucketLimiter;
use crate::routes::greeter::GreeterStats;
use crate::service::TaskService;

/// State shared across both listeners.
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Task service: store + state machine + event bus.
    pub service: TaskService<SqliteStore>,
    /// Per-client token buckets for the API listener.
    pub limiter: TokenBucketLimiter,
    /// In-memory greeter statistics.
    pub greeter: GreeterStats,
}

impl AppState {
    pub fn new(config: Config, service: TaskService<SqliteStore>) -> Self {
        let limiter = TokenBucketLimiter::new(config.rate_limit_rps, config.rate_limit_burst);
        Self {
            config: Arc::new(config),
            service,
            limiter,
            greeter: GreeterStats::default(),
        }
    }
}
