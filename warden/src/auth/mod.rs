// Public API
pub mod csrf;
pub mod defaults;
pub mod error;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod sled_repository;
pub mod tokens;
pub mod validation;

// Re-export commonly used types
pub use csrf::{CsrfGuard, CsrfRequest};
pub use error::AuthError;
pub use models::{DeviceInfo, RefreshTokenRecord, Role, SessionInfo, User, UserProfile};
pub use password::PasswordHasher;
pub use repository::{RefreshTokenRepository, UserRepository};
pub use service::{AuthService, LoginOutcome, UpdateProfile};
pub use sled_repository::{SledRefreshTokenRepository, SledUserRepository};
pub use tokens::{AccessClaims, TokenCodec, TokenPair};
pub use validation::PasswordPolicy;
