use shared::config::Config;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use warden::auth::{
    defaults::ensure_admin, AuthService, CsrfGuard, PasswordHasher, RefreshTokenRepository,
    SledRefreshTokenRepository, SledUserRepository, TokenCodec,
};
use warden::ratelimit::{FixedWindowLimiter, RateLimitPolicy, RateLimiter};

use crate::cookies::CookieFactory;

/// One limiter per endpoint class
#[derive(Clone)]
pub struct RateLimiters {
    pub general: Arc<dyn RateLimiter>,
    pub auth: Arc<dyn RateLimiter>,
    pub strict: Arc<dyn RateLimiter>,
}

impl RateLimiters {
    pub fn from_config(config: &Config) -> Self {
        let settings = &config.rate_limit;
        let limiter = |policy: RateLimitPolicy, limit: u32| -> Arc<dyn RateLimiter> {
            let policy = policy.with_limit(limit).with_window(settings.window);
            info!(policy = policy.name, limit = policy.limit, "Rate limiter configured");
            Arc::new(FixedWindowLimiter::from_policy(policy))
        };

        Self {
            general: limiter(RateLimitPolicy::general(), settings.general),
            auth: limiter(RateLimitPolicy::auth(), settings.auth),
            strict: limiter(RateLimitPolicy::strict(), settings.strict),
        }
    }

    pub fn all(&self) -> [Arc<dyn RateLimiter>; 3] {
        [self.general.clone(), self.auth.clone(), self.strict.clone()]
    }
}

/// Server state shared across handlers and middleware
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth_service: Arc<AuthService>,
    pub token_repository: Arc<dyn RefreshTokenRepository>,
    pub csrf_guard: Arc<CsrfGuard>,
    pub cookies: Arc<CookieFactory>,
    pub rate_limiters: RateLimiters,
}

impl AppState {
    /// Open the stores under `config.data_dir` and wire up the services.
    pub async fn init(config: Config) -> shared::Result<Self> {
        let data_dir = Path::new(&config.data_dir);
        std::fs::create_dir_all(data_dir).map_err(|e| {
            shared::Error::Config(format!(
                "Failed to create data directory {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        let users = Arc::new(
            SledUserRepository::new(data_dir.join("users.sled")).map_err(internal)?,
        );
        let tokens: Arc<dyn RefreshTokenRepository> = Arc::new(
            SledRefreshTokenRepository::new(data_dir.join("tokens.sled")).map_err(internal)?,
        );
        info!(data_dir = %data_dir.display(), "Credential stores opened");

        let codec = Arc::new(TokenCodec::new(
            &config.jwt.access_secret,
            &config.jwt.refresh_secret,
            config.jwt.access_ttl,
            config.jwt.refresh_ttl,
        ));
        let hash_settings = &config.password_hash;
        let hasher = PasswordHasher::new(
            hash_settings.memory_kib,
            hash_settings.iterations,
            hash_settings.parallelism,
        )
        .map_err(internal)?;

        let auth_service =
            Arc::new(AuthService::new(users, tokens.clone(), codec, hasher).map_err(internal)?);

        if let Some(admin) = &config.admin {
            if let Err(e) =
                ensure_admin(&auth_service, &admin.email, &admin.username, &admin.password).await
            {
                warn!(error = %e, "Failed to bootstrap admin user");
            }
        }

        let csrf_guard = Arc::new(CsrfGuard::new(&config.csrf_secret));
        let cookies = Arc::new(CookieFactory::new(
            config.cookie.clone(),
            config.jwt.access_ttl,
            config.jwt.refresh_ttl,
            csrf_guard.max_age(),
        ));
        let rate_limiters = RateLimiters::from_config(&config);

        Ok(Self {
            config: Arc::new(config),
            auth_service,
            token_repository: tokens,
            csrf_guard,
            cookies,
            rate_limiters,
        })
    }
}

fn internal(err: warden::AuthError) -> shared::Error {
    shared::Error::Internal(err.to_string())
}
