pub mod admin;
pub mod auth;
pub mod health;

pub use admin::{force_logout_user, update_user_status};
pub use auth::{
    change_password, csrf_token, get_profile, list_sessions, login, logout, logout_all, refresh,
    register, update_profile,
};
pub use health::health_check;
