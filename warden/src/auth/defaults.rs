use tracing::info;

use super::error::AuthError;
use super::models::{Role, User};
use super::service::AuthService;
use super::validation::{sanitize, validate_email, validate_username};

/// Create the bootstrap admin account unless its email or username is already registered.
///
/// Returns `true` when a new admin was created.
pub async fn ensure_admin(
    service: &AuthService,
    email: &str,
    username: &str,
    password: &str,
) -> Result<bool, AuthError> {
    let email = sanitize(email);
    let username = sanitize(username);

    validate_email(&email)?;
    validate_username(&username)?;
    service.policy().validate(password)?;

    let users = service.users();
    if users.email_exists(&email).await? || users.username_exists(&username).await? {
        info!(username = %username, "Admin user already exists");
        return Ok(false);
    }

    let password_hash = service.hasher().hash(password)?;
    let admin = users
        .create(User::new(email, username, password_hash, Role::Admin))
        .await?;

    info!(user_id = %admin.id, username = %admin.username, "Default admin user created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::DeviceInfo;
    use crate::auth::password::PasswordHasher;
    use crate::auth::sled_repository::{SledRefreshTokenRepository, SledUserRepository};
    use crate::auth::tokens::TokenCodec;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(temp_dir: &TempDir) -> AuthService {
        let users = Arc::new(SledUserRepository::new(temp_dir.path().join("users.sled")).unwrap());
        let tokens = Arc::new(
            SledRefreshTokenRepository::new(temp_dir.path().join("tokens.sled")).unwrap(),
        );
        let codec = Arc::new(TokenCodec::new(
            "access-secret",
            "refresh-secret",
            Duration::from_secs(60),
            Duration::from_secs(3600),
        ));
        AuthService::new(users, tokens, codec, PasswordHasher::new(1024, 1, 1).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_admin_creates_once() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        assert!(
            ensure_admin(&service, "root@example.com", "root", "R00tPassword")
                .await
                .unwrap()
        );
        assert!(
            !ensure_admin(&service, "root@example.com", "root", "R00tPassword")
                .await
                .unwrap()
        );

        let outcome = service
            .login("root@example.com", "R00tPassword", DeviceInfo::default())
            .await
            .unwrap();
        assert_eq!(outcome.user.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_ensure_admin_rejects_weak_password() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let result = ensure_admin(&service, "root@example.com", "root", "admin").await;
        assert!(matches!(result, Err(AuthError::Validation(_))));
    }
}
