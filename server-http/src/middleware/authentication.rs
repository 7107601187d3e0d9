use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use warden::auth::{AccessClaims, Role};
use warden::AuthError;

use crate::api::ApiError;
use crate::cookies::{get_cookie, ACCESS_COOKIE_NAME};
use crate::state::AppState;

/// Caller identity established from a verified access token.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

impl From<AccessClaims> for Identity {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
            role: claims.role,
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(ApiError(AuthError::InvalidToken))
    }
}

/// Extract Bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth_header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = auth_header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// The access token of a request: Bearer header first, then the `access_token` cookie.
pub fn access_token(headers: &HeaderMap) -> Option<&str> {
    extract_bearer_token(headers).or_else(|| get_cookie(headers, ACCESS_COOKIE_NAME))
}

/// Attach an [`Identity`] when the request carries a valid access token.
///
/// Never rejects; routes that need a caller add [`require_auth`].
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = access_token(request.headers()).and_then(|token| {
        match state.auth_service.verify_access_token(token) {
            Ok(claims) => Some(Identity::from(claims)),
            Err(_) => {
                debug!("Ignoring invalid access token");
                None
            }
        }
    });

    if let Some(identity) = identity {
        request.extensions_mut().insert(identity);
    }

    next.run(request).await
}

pub async fn require_auth(request: Request, next: Next) -> Result<Response, ApiError> {
    if request.extensions().get::<Identity>().is_none() {
        return Err(ApiError(AuthError::InvalidToken));
    }
    Ok(next.run(request).await)
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    match request.extensions().get::<Identity>() {
        None => Err(ApiError(AuthError::InvalidToken)),
        Some(identity) if identity.role != Role::Admin => {
            debug!(user_id = %identity.user_id, "Admin route refused");
            Err(ApiError(AuthError::PermissionDenied))
        }
        Some(_) => Ok(next.run(request).await),
    }
}
