use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use super::error::AuthError;
use super::models::{Role, User};

/// Claims carried by the short-lived access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Claims carried by the refresh token. `jti` keeps two tokens minted in the same second for the
/// same user distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub raw: String,
    pub expires_at: DateTime<Utc>,
}

/// Raw tokens handed to the client after login or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in: u64,
    pub refresh_expires_in: u64,
}

pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, AuthError> {
        let iat = Utc::now().timestamp();
        let claims = AccessClaims {
            user_id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            iat,
            nbf: iat,
            exp: iat + ttl_secs(self.access_ttl),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|e| AuthError::TokenEncoding(e.to_string()))
    }

    pub fn issue_refresh_token(&self, user_id: &str) -> Result<IssuedRefreshToken, AuthError> {
        let iat = Utc::now().timestamp();
        let exp = iat + ttl_secs(self.refresh_ttl);
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat,
            nbf: iat,
            exp,
        };

        let raw = encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
            .map_err(|e| AuthError::TokenEncoding(e.to_string()))?;
        let expires_at = DateTime::<Utc>::from_timestamp(exp, 0)
            .ok_or_else(|| AuthError::TokenEncoding("refresh expiry out of range".to_string()))?;

        Ok(IssuedRefreshToken { raw, expires_at })
    }

    /// Checks signature, algorithm and time bounds. Every failure collapses into `InvalidToken`.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf", "iat"]);

        decode::<AccessClaims>(token, &self.access_decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    /// Tamper check only. Expiry and revocation are decided by the ledger.
    pub fn verify_refresh_signature(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["sub"]);

        decode::<RefreshClaims>(token, &self.refresh_decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}

/// Lowercase hex SHA-256 of a raw token, the only form the ledger stores.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            "access-secret",
            "refresh-secret",
            Duration::from_secs(1800),
            Duration::from_secs(7 * 24 * 3600),
        )
    }

    fn user() -> User {
        User::new(
            "a@x.com".to_string(),
            "alice".to_string(),
            "hash".to_string(),
            Role::Reader,
        )
    }

    #[test]
    fn test_access_token_carries_identity() {
        let codec = codec();
        let user = user();

        let token = codec.issue_access_token(&user).unwrap();
        let claims = codec.verify_access_token(&token).unwrap();

        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, Role::Reader);
        assert_eq!(claims.exp - claims.iat, 1800);
        assert_eq!(claims.nbf, claims.iat);
    }

    #[test]
    fn test_expired_access_token_is_invalid() {
        let codec = codec();
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            role: Role::Reader,
            iat: now - 120,
            nbf: now - 120,
            exp: now - 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();

        assert!(matches!(
            codec.verify_access_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_not_yet_valid_access_token_is_invalid() {
        let codec = codec();
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            role: Role::Admin,
            iat: now,
            nbf: now + 600,
            exp: now + 1200,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();

        assert!(codec.verify_access_token(&token).is_err());
    }

    #[test]
    fn test_secrets_are_not_interchangeable() {
        let codec = codec();
        let user = user();

        let refresh = codec.issue_refresh_token(&user.id).unwrap();
        assert!(codec.verify_access_token(&refresh.raw).is_err());

        let access = codec.issue_access_token(&user).unwrap();
        assert!(codec.verify_refresh_signature(&access).is_err());
    }

    #[test]
    fn test_tampered_tokens_rejected() {
        let codec = codec();
        let token = codec.issue_access_token(&user()).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');

        assert!(codec.verify_access_token(&tampered).is_err());
        assert!(codec.verify_access_token("not.a.jwt").is_err());
        assert!(codec.verify_refresh_signature("").is_err());
    }

    #[test]
    fn test_refresh_tokens_are_unique_per_issue() {
        let codec = codec();

        let first = codec.issue_refresh_token("u1").unwrap();
        let second = codec.issue_refresh_token("u1").unwrap();

        assert_ne!(first.raw, second.raw);
        assert_ne!(hash_token(&first.raw), hash_token(&second.raw));

        let claims = codec.verify_refresh_signature(&first.raw).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.exp, first.expires_at.timestamp());
    }

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let hash = hash_token("abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
