//! Greeter demo wire types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct HelloRequest {
    /// Name to greet; empty defaults to "World".
    #[serde(default)]
    pub name: String,
    /// Language code (e.g. "es", "ja"); unknown codes greet in English.
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HelloReply {
    pub message: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub language: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct HelloBatchRequest {
    pub names: Vec<String>,
    #[serde(default)]
    pub common_message: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HelloBatchReply {
    pub greetings: Vec<HelloReply>,
    pub total_count: i32,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct GreetingStatsQuery {
    /// Case-insensitive substring filter over greeted names.
    pub name_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GreetingStatsReply {
    pub total_requests: i64,
    pub unique_names: i64,
    /// Top-10 greeted names by frequency.
    pub name_frequency: HashMap<String, i64>,
    /// Unix seconds of the most recent greeting; 0 when none yet.
    pub last_request_time: i64,
}
