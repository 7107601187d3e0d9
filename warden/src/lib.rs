//! Authentication and session security core: credential hashing, token issuance and rotation,
//! the refresh-token ledger, CSRF tokens, rate limiting and ledger cleanup.

pub mod auth;
pub mod cleanup;
pub mod ratelimit;

pub use auth::{AuthError, AuthService};
