use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
};
use tracing::info;
use warden::auth::UserProfile;
use warden::AuthError;

use crate::api::requests::UpdateUserStatusRequest;
use crate::api::responses::LogoutAllResponse;
use crate::api::{ApiError, ApiResponse};
use crate::middleware::Identity;
use crate::state::AppState;

/// POST /api/admin/users/{id}/logout-all
///
/// Revoke every refresh token of a user.
pub async fn force_logout_user(
    State(state): State<AppState>,
    admin: Identity,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<LogoutAllResponse>>, ApiError> {
    // 404 for unknown users rather than a silent zero
    state.auth_service.get_profile(&user_id).await?;

    let revoked = state.auth_service.logout_all(&user_id).await?;
    info!(admin = %admin.user_id, user_id = %user_id, revoked, "Forced logout");

    Ok(Json(
        ApiResponse::ok(LogoutAllResponse {
            revoked_sessions: revoked,
        })
        .with_message("User logged out from all devices"),
    ))
}

/// PUT /api/admin/users/{id}/status
///
/// Enable or disable an account. Disabling revokes all of the user's sessions.
pub async fn update_user_status(
    State(state): State<AppState>,
    admin: Identity,
    Path(user_id): Path<String>,
    body: Result<Json<UpdateUserStatusRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let Json(req) = body?;

    if admin.user_id == user_id && !req.is_active {
        return Err(AuthError::validation("Cannot disable your own account").into());
    }

    let profile = state
        .auth_service
        .set_user_active(&user_id, req.is_active)
        .await?;
    info!(admin = %admin.user_id, user_id = %user_id, active = req.is_active, "User status updated");

    Ok(Json(ApiResponse::ok(profile)))
}
