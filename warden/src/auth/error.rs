use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Current password is incorrect")]
    IncorrectPassword,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Refresh token expired")]
    TokenExpired,

    #[error("Refresh token reuse detected, please log in again")]
    TokenReuseDetected,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("CSRF validation failed: {0}")]
    CsrfRejected(String),

    #[error("Too many requests")]
    RateLimited { retry_after: Duration },

    #[error("Permission denied")]
    PermissionDenied,

    #[error("User not found")]
    UserNotFound,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Token encoding error: {0}")]
    TokenEncoding(String),
}

impl AuthError {
    pub fn validation(reason: impl Into<String>) -> Self {
        AuthError::Validation(reason.into())
    }

    /// Internal failures whose details must stay out of client responses.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthError::Storage(_)
                | AuthError::Serialization(_)
                | AuthError::PasswordHash(_)
                | AuthError::TokenEncoding(_)
        )
    }
}

impl From<sled::Error> for AuthError {
    fn from(err: sled::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Serialization(err.to_string())
    }
}
