use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::error;
use warden::AuthError;

use super::responses::ApiResponse;

/// HTTP face of [`AuthError`]. Internal failures are logged and reported generically.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(AuthError::validation(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AuthError::Validation(_) | AuthError::IncorrectPassword => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::TokenReuseDetected => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled
            | AuthError::CsrfRejected(_)
            | AuthError::PermissionDenied => StatusCode::FORBIDDEN,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Storage(_)
            | AuthError::Serialization(_)
            | AuthError::PasswordHash(_)
            | AuthError::TokenEncoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = if self.0.is_internal() {
            error!(error = %self.0, "Request failed with internal error");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let mut response = (status, Json(ApiResponse::failure(message))).into_response();

        if let AuthError::RateLimited { retry_after } = &self.0 {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AuthError::validation("bad"), StatusCode::BAD_REQUEST),
            (AuthError::IncorrectPassword, StatusCode::BAD_REQUEST),
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AuthError::TokenReuseDetected, StatusCode::UNAUTHORIZED),
            (AuthError::CsrfRejected("x".into()), StatusCode::FORBIDDEN),
            (AuthError::PermissionDenied, StatusCode::FORBIDDEN),
            (AuthError::UserNotFound, StatusCode::NOT_FOUND),
            (AuthError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                AuthError::Storage("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError(AuthError::RateLimited {
            retry_after: Duration::from_secs(42),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[tokio::test]
    async fn test_internal_errors_are_masked() {
        let response = ApiError(AuthError::Storage("sled exploded at /var/db".into())).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(body["error"], "Internal server error");
    }
}
