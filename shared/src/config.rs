use std::time::Duration;
use tracing::warn;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(SameSite::Strict),
            "lax" => Some(SameSite::Lax),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub same_site: SameSite,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub general: u32,
    pub auth: u32,
    pub strict: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct PasswordHashSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub http_port: u16,
    pub data_dir: String,
    pub jwt: JwtSettings,
    pub cookie: CookieSettings,
    pub csrf_secret: String,
    pub rate_limit: RateLimitSettings,
    pub token_cleanup_interval: Duration,
    pub password_hash: PasswordHashSettings,
    pub allowed_origins: Vec<String>,
    pub trust_proxy_headers: bool,
    pub frame_ancestors: String,
    pub admin: Option<AdminBootstrap>,
}

impl Config {
    const DEFAULT_HOST: &str = "0.0.0.0";
    const DEFAULT_HTTP_PORT: u16 = 9091;
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_ACCESS_SECRET: &str = "dev-access-secret-change-me";
    const DEFAULT_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";
    const DEFAULT_CSRF_SECRET: &str = "dev-csrf-secret-change-me";
    const DEFAULT_ACCESS_MINUTES: u64 = 30;
    const DEFAULT_REFRESH_DAYS: u64 = 7;
    const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 6 * 60 * 60;
    const MIN_SECRET_LEN: usize = 32;

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        let environment = var("WARDEN_ENV")
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);
        let production = environment == Environment::Production;

        let access_ttl = match parsed("WARDEN_JWT_ACCESS_EXPIRE_SECONDS") {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                let minutes = parsed("WARDEN_JWT_ACCESS_EXPIRE_MINUTES")
                    .filter(|m| *m > 0)
                    .unwrap_or(Self::DEFAULT_ACCESS_MINUTES);
                Duration::from_secs(minutes * 60)
            }
        };
        let refresh_days = parsed("WARDEN_JWT_REFRESH_EXPIRE_DAYS")
            .filter(|d| *d > 0)
            .unwrap_or(Self::DEFAULT_REFRESH_DAYS);

        let jwt = JwtSettings {
            access_secret: var("WARDEN_JWT_ACCESS_SECRET").unwrap_or_else(|| {
                warn!("WARDEN_JWT_ACCESS_SECRET not set, using development default");
                Self::DEFAULT_ACCESS_SECRET.to_string()
            }),
            refresh_secret: var("WARDEN_JWT_REFRESH_SECRET").unwrap_or_else(|| {
                warn!("WARDEN_JWT_REFRESH_SECRET not set, using development default");
                Self::DEFAULT_REFRESH_SECRET.to_string()
            }),
            access_ttl,
            refresh_ttl: Duration::from_secs(refresh_days * 24 * 60 * 60),
        };

        let csrf_secret = var("WARDEN_CSRF_SECRET").unwrap_or_else(|| {
            warn!("WARDEN_CSRF_SECRET not set, using development default");
            Self::DEFAULT_CSRF_SECRET.to_string()
        });

        let mut same_site = if production {
            SameSite::Strict
        } else {
            var("WARDEN_COOKIE_SAME_SITE")
                .and_then(|v| SameSite::parse(&v))
                .unwrap_or(SameSite::Lax)
        };
        let mut secure = var("WARDEN_COOKIE_SECURE")
            .map(|v| parse_bool(&v))
            .unwrap_or(production);
        if production {
            secure = true;
        }
        // Browsers drop SameSite=None cookies that are not Secure.
        if same_site == SameSite::None && !secure {
            warn!("WARDEN_COOKIE_SAME_SITE=none requires Secure cookies, falling back to lax");
            same_site = SameSite::Lax;
        }

        let mut domain = var("WARDEN_COOKIE_DOMAIN").map(|d| d.trim().to_string());
        if !production
            && matches!(domain.as_deref(), Some("localhost") | Some("127.0.0.1"))
        {
            domain = None;
        }

        let cookie = CookieSettings {
            domain,
            path: "/".to_string(),
            secure,
            same_site,
        };

        let rate_limit = RateLimitSettings {
            general: parsed("WARDEN_RATE_LIMIT_GENERAL")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(100),
            auth: parsed("WARDEN_RATE_LIMIT_AUTH")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(10),
            strict: parsed("WARDEN_RATE_LIMIT_STRICT")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(5),
            window: Duration::from_secs(
                parsed("WARDEN_RATE_LIMIT_WINDOW_SECONDS")
                    .filter(|w| *w > 0)
                    .unwrap_or(60),
            ),
        };

        let password_hash = PasswordHashSettings {
            memory_kib: parsed("WARDEN_ARGON2_MEMORY_KIB")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(19_456),
            iterations: parsed("WARDEN_ARGON2_ITERATIONS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(2),
            parallelism: parsed("WARDEN_ARGON2_PARALLELISM")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(1),
        };

        let admin = match (
            var("WARDEN_ADMIN_EMAIL"),
            var("WARDEN_ADMIN_USERNAME"),
            var("WARDEN_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(username), Some(password)) => Some(AdminBootstrap {
                email,
                username,
                password,
            }),
            _ => None,
        };

        Self {
            environment,
            host: var("WARDEN_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            http_port: var("WARDEN_HTTP_PORT")
                .and_then(|v| v.trim().parse::<u16>().ok())
                .unwrap_or(Self::DEFAULT_HTTP_PORT),
            data_dir: var("WARDEN_DATA_DIR").unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            jwt,
            cookie,
            csrf_secret,
            rate_limit,
            token_cleanup_interval: Duration::from_secs(
                parsed("WARDEN_TOKEN_CLEANUP_INTERVAL_SECONDS")
                    .filter(|s| *s > 0)
                    .unwrap_or(Self::DEFAULT_CLEANUP_INTERVAL_SECS),
            ),
            password_hash,
            allowed_origins: var("WARDEN_ALLOWED_ORIGINS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            trust_proxy_headers: var("WARDEN_TRUST_PROXY_HEADERS")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
            frame_ancestors: var("WARDEN_FRAME_ANCESTORS").unwrap_or_else(|| "'self'".to_string()),
            admin,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Reject configurations that must never reach production.
    pub fn validate(&self) -> Result<()> {
        // Written verbatim into Set-Cookie, so no separators or whitespace
        if let Some(domain) = &self.cookie.domain
            && !domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
        {
            return Err(Error::Config(format!(
                "WARDEN_COOKIE_DOMAIN {domain:?} is not a valid cookie domain"
            )));
        }

        if !self.is_production() {
            return Ok(());
        }

        let secrets = [
            ("WARDEN_JWT_ACCESS_SECRET", &self.jwt.access_secret, Self::DEFAULT_ACCESS_SECRET),
            ("WARDEN_JWT_REFRESH_SECRET", &self.jwt.refresh_secret, Self::DEFAULT_REFRESH_SECRET),
            ("WARDEN_CSRF_SECRET", &self.csrf_secret, Self::DEFAULT_CSRF_SECRET),
        ];
        for (name, value, default) in secrets {
            if value == default {
                return Err(Error::Config(format!("{name} must be set in production")));
            }
            if value.len() < Self::MIN_SECRET_LEN {
                return Err(Error::Config(format!(
                    "{name} must be at least {} bytes",
                    Self::MIN_SECRET_LEN
                )));
            }
        }

        if self.jwt.access_secret == self.jwt.refresh_secret {
            return Err(Error::Config(
                "access and refresh token secrets must differ".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
