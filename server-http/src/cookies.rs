use axum::http::{header, HeaderMap, HeaderValue};
use shared::config::CookieSettings;
use std::time::Duration;
use tracing::warn;

pub use warden::auth::csrf::CSRF_COOKIE_NAME;

pub const ACCESS_COOKIE_NAME: &str = "access_token";
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Builds `Set-Cookie` values with the deployment's domain, path, Secure and SameSite attributes.
#[derive(Debug, Clone)]
pub struct CookieFactory {
    settings: CookieSettings,
    access_max_age: u64,
    refresh_max_age: u64,
    csrf_max_age: u64,
}

impl CookieFactory {
    pub fn new(
        settings: CookieSettings,
        access_ttl: Duration,
        refresh_ttl: Duration,
        csrf_max_age: Duration,
    ) -> Self {
        Self {
            settings,
            access_max_age: access_ttl.as_secs(),
            refresh_max_age: refresh_ttl.as_secs(),
            csrf_max_age: csrf_max_age.as_secs(),
        }
    }

    pub fn access(&self, token: &str) -> String {
        self.build(ACCESS_COOKIE_NAME, token, self.access_max_age, true)
    }

    pub fn refresh(&self, token: &str) -> String {
        self.build(REFRESH_COOKIE_NAME, token, self.refresh_max_age, true)
    }

    /// Readable by client script so it can be echoed into the CSRF header.
    pub fn csrf(&self, token: &str) -> String {
        self.build(CSRF_COOKIE_NAME, token, self.csrf_max_age, false)
    }

    pub fn clear_access(&self) -> String {
        self.clear(ACCESS_COOKIE_NAME, true)
    }

    pub fn clear_refresh(&self) -> String {
        self.clear(REFRESH_COOKIE_NAME, true)
    }

    pub fn clear_csrf(&self) -> String {
        self.clear(CSRF_COOKIE_NAME, false)
    }

    fn clear(&self, name: &str, http_only: bool) -> String {
        format!(
            "{}; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            self.build(name, "", 0, http_only)
        )
    }

    fn build(&self, name: &str, value: &str, max_age: u64, http_only: bool) -> String {
        let mut cookie = format!(
            "{name}={value}; Path={path}; Max-Age={max_age}",
            path = self.settings.path
        );
        if let Some(domain) = &self.settings.domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.settings.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str(&format!("; SameSite={}", self.settings.same_site.as_str()));
        cookie
    }
}

/// Append a `Set-Cookie` header. Token material is always header-safe.
pub fn append_set_cookie(headers: &mut HeaderMap, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        Err(_) => {
            let name = cookie.split('=').next().unwrap_or_default();
            warn!(cookie = %name, "Dropping Set-Cookie with invalid header characters");
        }
    }
}

/// Read a cookie from all `Cookie` headers of a request.
pub fn get_cookie<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|part| part.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}
