use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::convert::Infallible;
use tracing::warn;
use warden::auth::{DeviceInfo, SessionInfo, UpdateProfile, UserProfile};
use warden::AuthError;

use crate::api::requests::{
    ChangePasswordRequest, LoginRequest, RefreshRequest, RegisterRequest, UpdateProfileRequest,
};
use crate::api::responses::{
    CsrfTokenResponse, LoginResponse, LogoutAllResponse, RefreshResponse, RegisteredUser,
};
use crate::api::{ApiError, ApiResponse};
use crate::cookies::{append_set_cookie, get_cookie, REFRESH_COOKIE_NAME};
use crate::middleware::{client_ip, Identity, CSRF_HEADER};
use crate::state::AppState;

/// User agent and address of the caller, recorded against new refresh tokens.
pub struct ClientDevice(pub DeviceInfo);

impl FromRequestParts<AppState> for ClientDevice {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());
        let ip = client_ip(
            &parts.headers,
            &parts.extensions,
            state.config.trust_proxy_headers,
        );
        let ip_address = (ip != "unknown").then_some(ip);

        Ok(ClientDevice(DeviceInfo::new(user_agent, ip_address)))
    }
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<RegisteredUser>>), ApiError> {
    let Json(req) = body?;

    let profile = state
        .auth_service
        .register(&req.email, &req.username, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(RegisteredUser::from(profile)).with_message("Registration successful")),
    ))
}

/// POST /api/auth/login
///
/// Sets the access, refresh and CSRF cookies. The CSRF token is also returned in the
/// `X-CSRF-Token` header for clients that cannot read cookies.
pub async fn login(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;

    let outcome = state
        .auth_service
        .login(&req.email, &req.password, device)
        .await?;
    let csrf = state.csrf_guard.issue(&outcome.user.id);

    let mut headers = HeaderMap::new();
    append_set_cookie(&mut headers, state.cookies.access(&outcome.tokens.access_token));
    append_set_cookie(&mut headers, state.cookies.refresh(&outcome.tokens.refresh_token));
    append_set_cookie(&mut headers, state.cookies.csrf(&csrf));
    insert_csrf_header(&mut headers, &csrf);

    let body = LoginResponse {
        access_token: outcome.tokens.access_token,
        expires_in: outcome.tokens.access_expires_in,
        user: outcome.user,
    };

    Ok((headers, Json(ApiResponse::ok(body).with_message("Login successful"))).into_response())
}

/// POST /api/auth/refresh
///
/// Rotates the refresh token. The cookie is preferred; a JSON `refresh_token` field is accepted
/// when no cookie is present. Any failure clears the session cookies.
pub async fn refresh(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let raw_token = get_cookie(&headers, REFRESH_COOKIE_NAME)
        .map(|s| s.to_string())
        .or_else(|| {
            serde_json::from_slice::<RefreshRequest>(&body)
                .ok()
                .and_then(|req| req.refresh_token)
                .filter(|token| !token.is_empty())
        });

    let result = match raw_token {
        Some(raw_token) => state.auth_service.refresh_token(&raw_token, device).await,
        None => Err(AuthError::InvalidToken),
    };

    match result {
        Ok(pair) => {
            let mut headers = HeaderMap::new();
            append_set_cookie(&mut headers, state.cookies.access(&pair.access_token));
            append_set_cookie(&mut headers, state.cookies.refresh(&pair.refresh_token));

            let body = RefreshResponse {
                access_token: pair.access_token,
                expires_in: pair.access_expires_in,
            };
            (headers, Json(ApiResponse::ok(body))).into_response()
        }
        Err(e) => {
            let mut response = ApiError(e).into_response();
            append_set_cookie(response.headers_mut(), state.cookies.clear_access());
            append_set_cookie(response.headers_mut(), state.cookies.clear_refresh());
            response
        }
    }
}

/// POST /api/auth/logout
///
/// Revokes the refresh token in the cookie, if any, and clears every session cookie.
/// Succeeds even when there was nothing to revoke.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(raw_token) = get_cookie(&headers, REFRESH_COOKIE_NAME) {
        if let Err(e) = state.auth_service.logout(raw_token).await {
            warn!(error = %e, "Failed to revoke refresh token on logout");
        }
    }

    let mut headers = HeaderMap::new();
    clear_session_cookies(&state, &mut headers);
    (headers, Json(ApiResponse::message("Logged out"))).into_response()
}

/// POST /api/auth/logout-all
pub async fn logout_all(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Response, ApiError> {
    let revoked = state.auth_service.logout_all(&identity.user_id).await?;

    let mut headers = HeaderMap::new();
    clear_session_cookies(&state, &mut headers);
    let body = ApiResponse::ok(LogoutAllResponse {
        revoked_sessions: revoked,
    })
    .with_message("Logged out from all devices");

    Ok((headers, Json(body)).into_response())
}

/// POST /api/auth/change-password
///
/// Every session ends, including the current one.
pub async fn change_password(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;

    state
        .auth_service
        .change_password(&identity.user_id, &req.old_password, &req.new_password)
        .await?;

    let mut headers = HeaderMap::new();
    clear_session_cookies(&state, &mut headers);
    let body = ApiResponse::message("Password changed, please log in again");

    Ok((headers, Json(body)).into_response())
}

/// GET /api/auth/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ApiResponse<Vec<SessionInfo>>>, ApiError> {
    let sessions = state
        .auth_service
        .get_active_sessions(&identity.user_id)
        .await?;
    Ok(Json(ApiResponse::ok(sessions)))
}

/// GET /api/auth/profile
pub async fn get_profile(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let profile = state.auth_service.get_profile(&identity.user_id).await?;
    Ok(Json(ApiResponse::ok(profile)))
}

/// PUT /api/auth/profile
pub async fn update_profile(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let Json(req) = body?;

    let changes = UpdateProfile {
        username: req.username,
        avatar_url: req.avatar_url,
    };
    let profile = state
        .auth_service
        .update_profile(&identity.user_id, changes)
        .await?;

    Ok(Json(ApiResponse::ok(profile).with_message("Profile updated")))
}

/// GET /api/auth/csrf-token
///
/// Issues a fresh CSRF token bound to the caller.
pub async fn csrf_token(State(state): State<AppState>, identity: Identity) -> Response {
    let token = state.csrf_guard.issue(&identity.user_id);

    let mut headers = HeaderMap::new();
    append_set_cookie(&mut headers, state.cookies.csrf(&token));
    insert_csrf_header(&mut headers, &token);

    (
        headers,
        Json(ApiResponse::ok(CsrfTokenResponse { csrf_token: token })),
    )
        .into_response()
}

fn clear_session_cookies(state: &AppState, headers: &mut HeaderMap) {
    append_set_cookie(headers, state.cookies.clear_access());
    append_set_cookie(headers, state.cookies.clear_refresh());
    append_set_cookie(headers, state.cookies.clear_csrf());
}

fn insert_csrf_header(headers: &mut HeaderMap, token: &str) {
    if let Ok(value) = HeaderValue::from_str(token) {
        headers.insert(CSRF_HEADER, value);
    }
}
