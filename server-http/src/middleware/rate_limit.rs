use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;
use warden::ratelimit::{RateDecision, RateLimiter};
use warden::AuthError;

use crate::api::ApiError;
use crate::state::AppState;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Paths the general limiter never counts
const UNMETERED_PATHS: &[&str] = &["/health"];

/// Resolve the client address used as the rate-limit key.
///
/// Forwarding headers are only honoured behind a trusted proxy; otherwise any client could pick
/// its own key.
pub fn client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("X-Real-IP")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

pub async fn general_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if UNMETERED_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }
    let limiter = state.rate_limiters.general.clone();
    enforce(limiter.as_ref(), &state, request, next).await
}

pub async fn auth_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = state.rate_limiters.auth.clone();
    enforce(limiter.as_ref(), &state, request, next).await
}

pub async fn strict_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = state.rate_limiters.strict.clone();
    enforce(limiter.as_ref(), &state, request, next).await
}

async fn enforce(
    limiter: &dyn RateLimiter,
    state: &AppState,
    request: Request,
    next: Next,
) -> Response {
    let key = client_ip(
        request.headers(),
        request.extensions(),
        state.config.trust_proxy_headers,
    );
    let decision = limiter.check(&key);

    if !decision.allowed {
        warn!(
            client = %key,
            path = %request.uri().path(),
            limit = decision.limit,
            "Rate limit exceeded"
        );
        let mut response = ApiError(AuthError::RateLimited {
            retry_after: Duration::from_secs(decision.retry_after_secs()),
        })
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

/// Inner limiters run last on the way out, so their numbers are kept over outer ones.
fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    let values = [
        (LIMIT_HEADER, decision.limit.to_string()),
        (REMAINING_HEADER, decision.remaining.to_string()),
        (RESET_HEADER, decision.reset_at().to_rfc3339()),
    ];

    for (name, value) in values {
        if headers.contains_key(&name) {
            continue;
        }
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}
