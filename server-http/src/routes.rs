use crate::handlers;
use crate::middleware::{
    self, auth_rate_limit, require_admin, require_auth, strict_rate_limit,
};
use crate::state::AppState;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};

/// Build and configure the application router
pub fn build_router(state: AppState) -> Router {
    let auth_limit = || from_fn_with_state(state.clone(), auth_rate_limit);
    let strict_limit = || from_fn_with_state(state.clone(), strict_rate_limit);

    // Anonymous credential endpoints
    let public = Router::new()
        .route("/api/auth/register", post(handlers::register).layer(auth_limit()))
        .route("/api/auth/login", post(handlers::login).layer(auth_limit()))
        .route("/api/auth/refresh", post(handlers::refresh).layer(auth_limit()))
        .route("/api/auth/logout", post(handlers::logout));

    let protected = Router::new()
        .route(
            "/api/auth/logout-all",
            post(handlers::logout_all).layer(strict_limit()),
        )
        .route(
            "/api/auth/change-password",
            post(handlers::change_password).layer(strict_limit()),
        )
        .route("/api/auth/sessions", get(handlers::list_sessions))
        .route(
            "/api/auth/profile",
            get(handlers::get_profile).put(handlers::update_profile),
        )
        .route("/api/auth/csrf-token", get(handlers::csrf_token))
        .route_layer(from_fn(require_auth));

    let admin = Router::new()
        .route(
            "/api/admin/users/{id}/logout-all",
            post(handlers::force_logout_user),
        )
        .route(
            "/api/admin/users/{id}/status",
            put(handlers::update_user_status),
        )
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn(require_auth));

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(public)
        .merge(protected)
        .merge(admin);

    middleware::pipeline(router, &state).with_state(state)
}
