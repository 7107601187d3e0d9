use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::AuthError;
use super::models::{DeviceInfo, RefreshTokenRecord, Role, SessionInfo, User, UserProfile};
use super::password::PasswordHasher;
use super::repository::{RefreshTokenRepository, UserRepository};
use super::tokens::{AccessClaims, TokenCodec, TokenPair, hash_token};
use super::validation::{PasswordPolicy, sanitize, validate_email, validate_username};

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub user: UserProfile,
}

/// Profile fields a user may change. `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct UpdateProfile {
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

/// Session manager: registration, login, refresh-token rotation with reuse detection, logout and
/// password changes.
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn RefreshTokenRepository>,
    codec: Arc<TokenCodec>,
    hasher: PasswordHasher,
    policy: PasswordPolicy,
    dummy_hash: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn RefreshTokenRepository>,
        codec: Arc<TokenCodec>,
        hasher: PasswordHasher,
    ) -> Result<Self, AuthError> {
        // Verified against when the email is unknown so both login failures cost the same
        let dummy_hash = hasher.hash("warden-timing-equalizer")?;

        Ok(Self {
            users,
            tokens,
            codec,
            hasher,
            policy: PasswordPolicy::default(),
            dummy_hash,
        })
    }

    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<UserProfile, AuthError> {
        let email = sanitize(email);
        let username = sanitize(username);

        validate_email(&email)?;
        validate_username(&username)?;
        self.policy.validate(password)?;

        if self.users.email_exists(&email).await? {
            return Err(AuthError::Conflict("Email already registered".to_string()));
        }
        if self.users.username_exists(&username).await? {
            return Err(AuthError::Conflict("Username already taken".to_string()));
        }

        let password_hash = self.hash_password(password).await?;
        let user = self
            .users
            .create(User::new(email, username, password_hash, Role::Reader))
            .await?;

        info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(UserProfile::from(&user))
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: DeviceInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let email = sanitize(email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            // Burn the same verification cost as a wrong password
            self.verify_password(password, &self.dummy_hash).await?;
            return Err(AuthError::InvalidCredentials);
        };

        let password_ok = self.verify_password(password, &user.password_hash).await?;
        if !password_ok || !user.is_active {
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.issue_tokens(&user, device).await?;
        info!(user_id = %user.id, "User logged in");

        Ok(LoginOutcome {
            tokens,
            user: UserProfile::from(&user),
        })
    }

    /// Exchange a refresh token for a new pair, revoking the presented one.
    ///
    /// Presenting a token that is already revoked revokes every token of its owner.
    pub async fn refresh_token(
        &self,
        raw_token: &str,
        device: DeviceInfo,
    ) -> Result<TokenPair, AuthError> {
        let raw_token = raw_token.trim();
        if raw_token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        let claims = self.codec.verify_refresh_signature(raw_token)?;

        let Some(record) = self.tokens.find_by_hash(&hash_token(raw_token)).await? else {
            return Err(AuthError::InvalidToken);
        };
        if claims.sub != record.user_id {
            return Err(AuthError::InvalidToken);
        }

        if record.is_revoked() {
            return Err(self.contain_reuse(&record).await);
        }
        if record.is_expired_at(Utc::now()) {
            return Err(AuthError::TokenExpired);
        }

        let user = self
            .users
            .find_by_id(&record.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        // Revoke before issuing so a failure below leaves no live token behind
        if !self.tokens.revoke_if_active(&record.id).await? {
            return Err(self.contain_reuse(&record).await);
        }

        self.issue_tokens(&user, device).await
    }

    /// Revoke a single refresh token. Unknown or already revoked tokens are not an error.
    pub async fn logout(&self, raw_token: &str) -> Result<(), AuthError> {
        let raw_token = raw_token.trim();
        if raw_token.is_empty() {
            return Ok(());
        }
        self.tokens.revoke_by_hash(&hash_token(raw_token)).await?;
        Ok(())
    }

    pub async fn logout_all(&self, user_id: &str) -> Result<usize, AuthError> {
        let revoked = self.tokens.revoke_all_for_user(user_id).await?;
        info!(user_id = %user_id, revoked, "Revoked all refresh tokens");
        Ok(revoked)
    }

    pub async fn change_password(
        &self,
        user_id: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self.load_user(user_id).await?;

        if !self.verify_password(old_password, &user.password_hash).await? {
            return Err(AuthError::IncorrectPassword);
        }
        self.policy.validate(new_password)?;
        if old_password == new_password {
            return Err(AuthError::validation(
                "New password must differ from the current password",
            ));
        }

        let verified_hash = user.password_hash;
        let new_hash = self.hash_password(new_password).await?;
        self.users
            .update_with(user_id, &|u: &mut User| {
                // Another password change landed after verification
                if u.password_hash != verified_hash {
                    return Err(AuthError::Conflict(
                        "Password was changed concurrently".to_string(),
                    ));
                }
                u.password_hash = new_hash.clone();
                u.touch();
                Ok(())
            })
            .await?;

        info!(user_id = %user_id, "Password changed");
        self.logout_all(user_id).await?;
        Ok(())
    }

    pub async fn get_active_sessions(&self, user_id: &str) -> Result<Vec<SessionInfo>, AuthError> {
        let records = self.tokens.find_active_by_user(user_id, Utc::now()).await?;
        Ok(records.iter().map(SessionInfo::from).collect())
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<UserProfile, AuthError> {
        let user = self.load_user(user_id).await?;
        Ok(UserProfile::from(&user))
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        changes: UpdateProfile,
    ) -> Result<UserProfile, AuthError> {
        let username = changes.username.map(|username| sanitize(&username));
        if let Some(username) = &username {
            validate_username(username)?;
        }
        let avatar_url = changes.avatar_url.map(|avatar_url| sanitize(&avatar_url));

        let user = self
            .users
            .update_with(user_id, &|u: &mut User| {
                if let Some(username) = &username {
                    u.username = username.clone();
                }
                if let Some(avatar_url) = &avatar_url {
                    u.avatar_url = (!avatar_url.is_empty()).then(|| avatar_url.clone());
                }
                u.touch();
                Ok(())
            })
            .await?;
        Ok(UserProfile::from(&user))
    }

    /// Enable or disable an account. Disabling also ends every session of the user.
    pub async fn set_user_active(
        &self,
        user_id: &str,
        active: bool,
    ) -> Result<UserProfile, AuthError> {
        let user = self
            .users
            .update_with(user_id, &|u: &mut User| {
                u.is_active = active;
                u.touch();
                Ok(())
            })
            .await?;

        if !active {
            self.logout_all(user_id).await?;
        }
        info!(user_id = %user_id, active, "Account status changed");
        Ok(UserProfile::from(&user))
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.codec.verify_access_token(token)
    }

    async fn issue_tokens(&self, user: &User, device: DeviceInfo) -> Result<TokenPair, AuthError> {
        let access_token = self.codec.issue_access_token(user)?;
        let refresh = self.codec.issue_refresh_token(&user.id)?;

        let record = RefreshTokenRecord::new(
            user.id.clone(),
            hash_token(&refresh.raw),
            refresh.expires_at,
            device,
        );
        self.tokens.create(record).await?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.raw,
            access_expires_in: self.codec.access_ttl().as_secs(),
            refresh_expires_in: self.codec.refresh_ttl().as_secs(),
        })
    }

    /// Revoke every token of the record's owner and produce the reuse error.
    async fn contain_reuse(&self, record: &RefreshTokenRecord) -> AuthError {
        warn!(
            user_id = %record.user_id,
            token_id = %record.id,
            "Refresh token reuse detected, revoking all sessions"
        );
        match self.tokens.revoke_all_for_user(&record.user_id).await {
            Ok(revoked) => {
                warn!(user_id = %record.user_id, revoked, "Sessions revoked after token reuse");
                AuthError::TokenReuseDetected
            }
            Err(e) => e,
        }
    }

    async fn load_user(&self, user_id: &str) -> Result<User, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let (password, hash) = (password.to_string(), hash.to_string());
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?
    }
}
