//! Greeter demo endpoints.
//!
//! A small localized greeting service with in-memory usage statistics,
//! handy for smoke-testing the deployment without touching the task store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use utoipa::OpenApi;

use taskflow_core::{ErrorCode, TaskError};

use crate::error::ApiError;
use crate::schemas::greeter::{
    GreetingStatsQuery, GreetingStatsReply, HelloBatchReply, HelloBatchRequest, HelloReply,
    HelloRequest,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(say_hello, say_hello_batch, greeting_stats),
    components(schemas(HelloRequest, HelloReply, HelloBatchRequest, HelloBatchReply, GreetingStatsReply))
)]
pub struct GreeterApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/greeter/hello", post(say_hello))
        .route("/greeter/hello/batch", post(say_hello_batch))
        .route("/greeter/stats", get(greeting_stats))
}

/// In-memory greeting statistics.
#[derive(Debug, Default)]
pub struct GreeterStats {
    inner: RwLock<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_requests: i64,
    name_frequency: HashMap<String, i64>,
    last_request: Option<DateTime<Utc>>,
}

impl GreeterStats {
    pub fn record(&self, name: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.total_requests += 1;
        if !name.is_empty() {
            *inner
                .name_frequency
                .entry(name.to_ascii_lowercase())
                .or_default() += 1;
        }
        inner.last_request = Some(Utc::now());
    }

    fn reply(&self, filter: Option<&str>) -> GreetingStatsReply {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let filter = filter.map(str::to_ascii_lowercase).unwrap_or_default();

        let mut counted: Vec<(String, i64)> = inner
            .name_frequency
            .iter()
            .filter(|(name, _)| filter.is_empty() || name.contains(&filter))
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        counted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counted.truncate(10);

        GreetingStatsReply {
            total_requests: inner.total_requests,
            unique_names: inner.name_frequency.len() as i64,
            name_frequency: counted.into_iter().collect(),
            last_request_time: inner.last_request.map(|t| t.timestamp()).unwrap_or(0),
        }
    }
}

fn greeting_for_language(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "zh" | "chinese" => "你好",
        "es" | "spanish" => "Hola",
        "fr" | "french" => "Bonjour",
        "ja" | "japanese" => "こんにちは",
        "ko" | "korean" => "안녕하세요",
        "ru" | "russian" => "Привет",
        "de" | "german" => "Hallo",
        "it" | "italian" => "Ciao",
        _ => "Hello",
    }
}

/// Greet one name; empty names greet "World".
#[utoipa::path(
    post,
    path = "/api/v1/greeter/hello",
    tag = "greeter",
    request_body = HelloRequest,
    responses((status = 200, description = "Greeting", body = HelloReply))
)]
pub async fn say_hello(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HelloRequest>,
) -> Json<HelloReply> {
    let name = if req.name.is_empty() { "World" } else { &req.name };
    state.greeter.record(name);

    Json(HelloReply {
        message: format!("{} {}!", greeting_for_language(&req.language), name),
        timestamp: Utc::now().timestamp(),
        language: req.language,
    })
}

/// Greet a list of names, bounded by `MAX_GREETINGS`.
#[utoipa::path(
    post,
    path = "/api/v1/greeter/hello/batch",
    tag = "greeter",
    request_body = HelloBatchRequest,
    responses(
        (status = 200, description = "Greetings", body = HelloBatchReply),
        (status = 400, description = "Too many names"),
    )
)]
pub async fn say_hello_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HelloBatchRequest>,
) -> Result<Json<HelloBatchReply>, ApiError> {
    let max = state.config.max_greetings;
    if req.names.len() > max {
        return Err(TaskError::invalid_param(format!(
            "too many names, maximum allowed: {max}"
        ))
        .into());
    }

    let greetings: Vec<HelloReply> = req
        .names
        .iter()
        .map(|name| {
            state.greeter.record(name);
            let message = if req.common_message.is_empty() {
                format!("Hello {name}!")
            } else {
                format!("Hello {name}! {}", req.common_message)
            };
            HelloReply {
                message,
                timestamp: Utc::now().timestamp(),
                language: String::new(),
            }
        })
        .collect();

    let total_count = greetings.len() as i32;
    Ok(Json(HelloBatchReply {
        greetings,
        total_count,
    }))
}

/// Greeting statistics; requires `ENABLE_STATS`.
#[utoipa::path(
    get,
    path = "/api/v1/greeter/stats",
    tag = "greeter",
    params(GreetingStatsQuery),
    responses(
        (status = 200, description = "Usage statistics", body = GreetingStatsReply),
        (status = 403, description = "Statistics disabled"),
    )
)]
pub async fn greeting_stats(
    State(state): State<Arc<AppState>>,
    Query(q): Query<GreetingStatsQuery>,
) -> Result<Json<GreetingStatsReply>, ApiError> {
    if !state.config.enable_stats {
        return Err(TaskError::with_message(
            ErrorCode::Forbidden,
            "statistics feature is disabled",
        )
        .into());
    }
    Ok(Json(state.greeter.reply(q.name_filter.as_deref())))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn greetings_by_language() {
        assert_eq!(greeting_for_language(""), "Hello");
        assert_eq!(greeting_for_language("ES"), "Hola");
        assert_eq!(greeting_for_language("japanese"), "こんにちは");
        assert_eq!(greeting_for_language("klingon"), "Hello");
    }

    #[test]
    fn stats_count_names_case_insensitively() {
        let stats = GreeterStats::default();
        stats.record("Ada");
        stats.record("ada");
        stats.record("Grace");
        stats.record("");

        let reply = stats.reply(None);
        assert_eq!(reply.total_requests, 4);
        assert_eq!(reply.unique_names, 2);
        assert_eq!(reply.name_frequency.get("ada"), Some(&2));
        assert!(reply.last_request_time > 0);
    }

    #[test]
    fn stats_filter_and_top_ten() {
        let stats = GreeterStats::default();
        for i in 0..15 {
            for _ in 0..=i {
                stats.record(&format!("name{i}"));
            }
        }

        let reply = stats.reply(None);
        assert_eq!(reply.name_frequency.len(), 10, "top-10 cap");
        assert!(reply.name_frequency.contains_key("name14"));
        assert!(!reply.name_frequency.contains_key("name0"));

        let reply = stats.reply(Some("name14"));
        assert_eq!(reply.name_frequency.len(), 1);
    }
}
