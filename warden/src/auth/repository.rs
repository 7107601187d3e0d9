use super::error::AuthError;
use super::models::{RefreshTokenRecord, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Credential store. Email and username lookups are case-insensitive.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user, failing with `Conflict` if the email or username is taken
    async fn create(&self, user: User) -> Result<User, AuthError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;

    /// Apply `change` to the stored user and write it back only if nobody else wrote in between.
    ///
    /// A lost write is retried against the fresh record, so concurrent changes to other
    /// fields survive. Renames keep the email and username indexes in step.
    async fn update_with(
        &self,
        id: &str,
        change: &(dyn for<'u> Fn(&'u mut User) -> Result<(), AuthError> + Send + Sync),
    ) -> Result<User, AuthError>;

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError>;

    async fn username_exists(&self, username: &str) -> Result<bool, AuthError>;
}

/// Refresh-token ledger, the source of truth for rotation and reuse detection.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Persist a freshly issued record. A second record for the same hash is a `Conflict`.
    async fn create(&self, record: RefreshTokenRecord) -> Result<RefreshTokenRecord, AuthError>;

    async fn find_by_hash(&self, token_hash: &str)
    -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Atomically set `revoked_at` if it is still unset.
    ///
    /// Returns `false` when the record is missing or another caller revoked it first.
    async fn revoke_if_active(&self, id: &str) -> Result<bool, AuthError>;

    /// Revoke by token hash. Unknown or already revoked tokens return `false` and change nothing.
    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool, AuthError>;

    /// Revoke every non-revoked record of a user, returning how many were revoked
    async fn revoke_all_for_user(&self, user_id: &str) -> Result<usize, AuthError>;

    /// Non-revoked, unexpired records of a user, newest first
    async fn find_active_by_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError>;

    /// Delete records whose expiry has passed, revoked or not
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError>;
}
