use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

use super::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const CSRF_HEADER_NAME: &str = "X-CSRF-Token";

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_CLOCK_SKEW_SECS: i64 = 60;

pub const DEFAULT_EXCLUDED_PATHS: &[&str] = &[
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/refresh",
];

/// The parts of a request the double-submit check looks at.
#[derive(Debug, Clone, Copy)]
pub struct CsrfRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub cookie: Option<&'a str>,
    pub header: Option<&'a str>,
    /// Caller identity resolved from the access token, if any.
    pub user_id: Option<&'a str>,
}

/// Issues and checks stateless anti-forgery tokens of the form
/// `base64url("{user_id}:{unix_ts}:{hex hmac}")`.
#[derive(Clone)]
pub struct CsrfGuard {
    secret: Vec<u8>,
    max_age: Duration,
    excluded_paths: Vec<String>,
}

impl CsrfGuard {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            max_age: DEFAULT_MAX_AGE,
            excluded_paths: DEFAULT_EXCLUDED_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn issue(&self, user_id: &str) -> String {
        self.issue_at(user_id, Utc::now().timestamp())
    }

    fn issue_at(&self, user_id: &str, issued_at: i64) -> String {
        let data = format!("{user_id}:{issued_at}");
        let signature = hex::encode(self.mac(&data).finalize().into_bytes());
        URL_SAFE.encode(format!("{data}:{signature}"))
    }

    /// Verify signature and age, and that the token belongs to `user_id`.
    pub fn verify_token(&self, token: &str, user_id: &str) -> Result<(), AuthError> {
        let owner = self.verify_at(token, Utc::now().timestamp())?;
        if owner != user_id {
            return Err(AuthError::CsrfRejected("token user mismatch".to_string()));
        }
        Ok(())
    }

    pub fn is_exempt(&self, method: &str, path: &str) -> bool {
        matches!(
            method.to_ascii_uppercase().as_str(),
            "GET" | "HEAD" | "OPTIONS"
        ) || self.excluded_paths.iter().any(|p| p == path)
    }

    /// Double-submit check for one request.
    pub fn check(&self, request: &CsrfRequest<'_>) -> Result<(), AuthError> {
        if self.is_exempt(request.method, request.path) {
            return Ok(());
        }

        let cookie = request
            .cookie
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::CsrfRejected("missing CSRF cookie".to_string()))?;
        let header = request
            .header
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AuthError::CsrfRejected("missing CSRF header".to_string()))?;

        if !bool::from(cookie.as_bytes().ct_eq(header.as_bytes())) {
            return Err(AuthError::CsrfRejected("token mismatch".to_string()));
        }

        match request.user_id {
            Some(user_id) => self.verify_token(header, user_id),
            None => self.verify_at(header, Utc::now().timestamp()).map(|_| ()),
        }
    }

    /// Returns the embedded user id when signature and age check out.
    fn verify_at(&self, token: &str, now: i64) -> Result<String, AuthError> {
        let invalid = |reason: &str| AuthError::CsrfRejected(reason.to_string());

        let decoded = URL_SAFE
            .decode(token)
            .map_err(|_| invalid("invalid token format"))?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid("invalid token format"))?;

        // User ids never contain ':' but split from the right regardless
        let mut parts = decoded.rsplitn(3, ':');
        let (Some(signature), Some(timestamp), Some(user_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("malformed token"));
        };

        let issued_at: i64 = timestamp
            .parse()
            .map_err(|_| invalid("invalid timestamp"))?;
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        if now.saturating_sub(issued_at) > max_age {
            return Err(invalid("token expired"));
        }
        if issued_at.saturating_sub(now) > MAX_CLOCK_SKEW_SECS {
            return Err(invalid("token issued in the future"));
        }

        let signature = hex::decode(signature).map_err(|_| invalid("invalid signature"))?;
        self.mac(&format!("{user_id}:{issued_at}"))
            .verify_slice(&signature)
            .map_err(|_| invalid("invalid signature"))?;

        Ok(user_id.to_string())
    }

    fn mac(&self, data: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts keys of any length"));
        mac.update(data.as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> CsrfGuard {
        CsrfGuard::new("csrf-secret")
    }

    fn post<'a>(cookie: Option<&'a str>, header: Option<&'a str>) -> CsrfRequest<'a> {
        CsrfRequest {
            method: "POST",
            path: "/api/auth/logout-all",
            cookie,
            header,
            user_id: None,
        }
    }

    #[test]
    fn test_token_format() {
        let token = guard().issue_at("user-1", 1_700_000_000);
        let decoded = String::from_utf8(URL_SAFE.decode(&token).unwrap()).unwrap();
        let parts: Vec<&str> = decoded.split(':').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "user-1");
        assert_eq!(parts[1], "1700000000");
        assert_eq!(parts[2].len(), 64);
    }

    #[test]
    fn test_issue_and_verify() {
        let guard = guard();
        let token = guard.issue("user-1");

        assert!(guard.verify_token(&token, "user-1").is_ok());
        assert!(matches!(
            guard.verify_token(&token, "user-2"),
            Err(AuthError::CsrfRejected(_))
        ));
    }

    #[test]
    fn test_token_age_ceiling() {
        let guard = guard();
        let now = Utc::now().timestamp();

        let fresh = guard.issue_at("user-1", now - 23 * 3600);
        assert!(guard.verify_at(&fresh, now).is_ok());

        let stale = guard.issue_at("user-1", now - 24 * 3600 - 1);
        assert!(guard.verify_at(&stale, now).is_err());

        let future = guard.issue_at("user-1", now + 3600);
        assert!(guard.verify_at(&future, now).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = CsrfGuard::new("other-secret").issue("user-1");
        assert!(guard().verify_token(&token, "user-1").is_err());
        assert!(guard().verify_token("%%%", "user-1").is_err());
    }

    #[test]
    fn test_safe_methods_and_excluded_paths_skip_check() {
        let guard = guard();

        for method in ["GET", "HEAD", "OPTIONS", "get"] {
            let request = CsrfRequest {
                method,
                ..post(None, None)
            };
            assert!(guard.check(&request).is_ok());
        }

        let login = CsrfRequest {
            path: "/api/auth/login",
            ..post(None, None)
        };
        assert!(guard.check(&login).is_ok());

        // Exact match only
        let nested = CsrfRequest {
            path: "/api/auth/login/extra",
            ..post(None, None)
        };
        assert!(guard.check(&nested).is_err());
    }

    #[test]
    fn test_double_submit_requires_both_values() {
        let guard = guard();
        let token = guard.issue("user-1");

        assert!(guard.check(&post(None, Some(&token))).is_err());
        assert!(guard.check(&post(Some(&token), None)).is_err());
        assert!(guard.check(&post(Some(""), Some(""))).is_err());
        assert!(guard.check(&post(Some(&token), Some(&token))).is_ok());
    }

    #[test]
    fn test_mismatched_values_rejected_even_if_both_valid() {
        let guard = guard();
        let cookie = guard.issue_at("user-1", Utc::now().timestamp());
        let header = guard.issue_at("user-1", Utc::now().timestamp() - 10);

        assert!(guard.verify_token(&cookie, "user-1").is_ok());
        assert!(guard.verify_token(&header, "user-1").is_ok());

        let err = guard.check(&post(Some(&cookie), Some(&header))).unwrap_err();
        assert!(matches!(err, AuthError::CsrfRejected(reason) if reason == "token mismatch"));

        // A header that only extends the cookie value is still a mismatch
        let longer = format!("{cookie}A");
        let err = guard.check(&post(Some(&cookie), Some(&longer))).unwrap_err();
        assert!(matches!(err, AuthError::CsrfRejected(reason) if reason == "token mismatch"));
    }

    #[test]
    fn test_identity_binding() {
        let guard = guard();
        let token = guard.issue("user-1");

        let own = CsrfRequest {
            user_id: Some("user-1"),
            ..post(Some(&token), Some(&token))
        };
        assert!(guard.check(&own).is_ok());

        let other = CsrfRequest {
            user_id: Some("user-2"),
            ..post(Some(&token), Some(&token))
        };
        assert!(guard.check(&other).is_err());
    }

    #[test]
    fn test_forged_matching_pair_rejected() {
        let guard = guard();
        let forged = URL_SAFE.encode(format!("user-1:{}:deadbeef", Utc::now().timestamp()));

        assert!(guard.check(&post(Some(&forged), Some(&forged))).is_err());
    }
}
