//! CORS policy for the API listener.
//!
//! `CORS_ORIGINS` (comma-separated) restricts browsers to the listed
//! origins. Unset, or set to nothing parseable, the policy is wildcard,
//! which is only appropriate for development.

use std::sync::Arc;

use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::state::AppState;

pub fn cors_layer(state: Arc<AppState>) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origins.as_deref().map(origin_list) {
        Some(origins) if !origins.is_empty() => AllowOrigin::list(origins),
        _ => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn origin_list(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn origin_list_trims_and_skips_garbage() {
        let origins = origin_list(" https://a.example , https://b.example ,, bad\nvalue");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://a.example");
        assert_eq!(origins[1], "https://b.example");
    }

    #[test]
    fn empty_spec_yields_no_origins() {
        assert!(origin_list("").is_empty());
        assert!(origin_list(" , ").is_empty());
    }
}
