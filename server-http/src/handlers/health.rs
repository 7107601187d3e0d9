use axum::response::Json;

use crate::api::responses::HealthResponse;
use crate::api::ApiResponse;

/// GET /health
pub async fn health_check() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse { status: "ok" }))
}
