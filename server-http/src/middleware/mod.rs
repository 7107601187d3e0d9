//! Request interceptors and the order they run in.

pub mod authentication;
pub mod csrf;
pub mod rate_limit;
pub mod security_headers;

pub use authentication::{require_admin, require_auth, resolve_identity, Identity};
pub use csrf::{csrf_guard, CSRF_HEADER};
pub use rate_limit::{auth_rate_limit, client_ip, general_rate_limit, strict_rate_limit};
pub use security_headers::security_headers;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use shared::config::Config;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Wrap `router` in the global interceptors, outermost first:
///
/// 1. request tracing
/// 2. security headers
/// 3. CORS
/// 4. general rate limit
/// 5. identity resolution (never rejects)
/// 6. CSRF guard
///
/// Route groups add their own rate limits and auth requirements on top.
pub fn pipeline(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(from_fn_with_state(state.clone(), security_headers))
            .layer(cors_layer(&state.config))
            .layer(from_fn_with_state(state.clone(), general_rate_limit))
            .layer(from_fn_with_state(state.clone(), resolve_identity))
            .layer(from_fn_with_state(state.clone(), csrf_guard)),
    )
}

/// Wildcard origins get a credential-less policy; an explicit list may send cookies.
pub fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            CSRF_HEADER,
        ])
        .expose_headers([
            CSRF_HEADER,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(12 * 60 * 60));

    let wildcard = config.allowed_origins.is_empty()
        || config.allowed_origins.iter().any(|origin| origin == "*");
    if wildcard {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
