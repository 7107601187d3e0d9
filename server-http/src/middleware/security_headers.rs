use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

/// Normalise the configured `frame-ancestors` source list.
fn frame_ancestors(configured: &str) -> String {
    match configured.trim() {
        "" | "self" => "'self'".to_string(),
        "none" => "'none'".to_string(),
        other => other.to_string(),
    }
}

fn content_security_policy(frame_ancestors: &str) -> String {
    format!(
        "default-src 'self'; \
         script-src 'self'; \
         style-src 'self' 'unsafe-inline'; \
         img-src 'self' data: https: blob:; \
         font-src 'self' data:; \
         connect-src 'self' https:; \
         frame-ancestors {frame_ancestors}"
    )
}

pub async fn security_headers(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    let ancestors = frame_ancestors(&state.config.frame_ancestors);
    match ancestors.as_str() {
        "'none'" => {
            headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        }
        "'self'" => {
            headers.insert(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("SAMEORIGIN"),
            );
        }
        _ => {}
    }

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        PERMISSIONS_POLICY,
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    if let Ok(csp) = HeaderValue::from_str(&content_security_policy(&ancestors)) {
        headers.insert(header::CONTENT_SECURITY_POLICY, csp);
    }

    if state.config.is_production() {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ancestors_shorthands() {
        assert_eq!(frame_ancestors(""), "'self'");
        assert_eq!(frame_ancestors("self"), "'self'");
        assert_eq!(frame_ancestors(" none "), "'none'");
        assert_eq!(
            frame_ancestors("https://app.example.com"),
            "https://app.example.com"
        );
    }

    #[test]
    fn test_csp_ends_with_frame_ancestors() {
        let csp = content_security_policy("'none'");
        assert!(csp.starts_with("default-src 'self';"));
        assert!(csp.ends_with("frame-ancestors 'none'"));
    }
}
