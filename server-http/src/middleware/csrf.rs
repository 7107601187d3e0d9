use axum::{
    extract::{Request, State},
    http::HeaderName,
    middleware::Next,
    response::Response,
};
use tracing::warn;
use warden::auth::csrf::CSRF_COOKIE_NAME;
use warden::auth::CsrfRequest;

use super::authentication::Identity;
use crate::api::ApiError;
use crate::cookies::get_cookie;
use crate::state::AppState;

/// Lowercase form of `warden::auth::csrf::CSRF_HEADER_NAME`
pub const CSRF_HEADER: HeaderName = HeaderName::from_static("x-csrf-token");

/// Double-submit check on state-changing requests. Runs after identity resolution so that
/// tokens are bound to the caller.
pub async fn csrf_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let verdict = {
        let headers = request.headers();
        let check = CsrfRequest {
            method: request.method().as_str(),
            path: request.uri().path(),
            cookie: get_cookie(headers, CSRF_COOKIE_NAME),
            header: headers
                .get(&CSRF_HEADER)
                .and_then(|value| value.to_str().ok()),
            user_id: request
                .extensions()
                .get::<Identity>()
                .map(|identity| identity.user_id.as_str()),
        };
        state.csrf_guard.check(&check)
    };

    if let Err(e) = verdict {
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            error = %e,
            "CSRF check failed"
        );
        return Err(e.into());
    }

    Ok(next.run(request).await)
}
