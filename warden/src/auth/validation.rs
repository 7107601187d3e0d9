use regex::Regex;
use std::sync::LazyLock;

use super::error::AuthError;

// Constants for validation ranges
const MAX_EMAIL_LEN: usize = 255;
const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 30;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid username regex"));

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "12345678",
    "qwerty",
    "abc123",
    "monkey",
    "1234567",
    "letmein",
    "trustno1",
    "dragon",
    "baseball",
    "iloveyou",
    "master",
    "sunshine",
    "ashley",
    "bailey",
    "shadow",
    "123123",
    "654321",
    "superman",
    "qazwsx",
    "michael",
    "football",
    "password1",
    "password123",
    "welcome",
    "welcome1",
    "admin",
    "login",
    "passw0rd",
];

/// Drop NUL characters and trim surrounding whitespace.
pub fn sanitize(input: &str) -> String {
    let stripped: String = input.chars().filter(|c| *c != '\0').collect();
    stripped.trim().to_string()
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if email.is_empty() {
        return Err(AuthError::validation("Email is required"));
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(AuthError::validation("Email is too long"));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(AuthError::validation("Invalid email format"));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LEN {
        return Err(AuthError::Validation(format!(
            "Username must be at least {MIN_USERNAME_LEN} characters"
        )));
    }
    if len > MAX_USERNAME_LEN {
        return Err(AuthError::Validation(format!(
            "Username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if !USERNAME_RE.is_match(username) {
        return Err(AuthError::validation(
            "Username may only contain letters, numbers and underscores",
        ));
    }
    if username.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(AuthError::validation("Username cannot start with a number"));
    }
    Ok(())
}

/// Password strength rules applied on registration and password change.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: MIN_PASSWORD_LEN,
            max_length: MAX_PASSWORD_LEN,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: false,
        }
    }
}

impl PasswordPolicy {
    pub fn validate(&self, password: &str) -> Result<(), AuthError> {
        let len = password.chars().count();
        if len < self.min_length {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                self.min_length
            )));
        }
        if len > self.max_length {
            return Err(AuthError::Validation(format!(
                "Password must be at most {} characters",
                self.max_length
            )));
        }

        let mut missing = Vec::new();
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            missing.push("an uppercase letter");
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            missing.push("a lowercase letter");
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            missing.push("a number");
        }
        if self.require_special && password.chars().all(|c| c.is_alphanumeric()) {
            missing.push("a special character");
        }
        if !missing.is_empty() {
            return Err(AuthError::Validation(format!(
                "Password must contain {}",
                missing.join(", ")
            )));
        }

        if is_common_password(password) {
            return Err(AuthError::validation(
                "Password is too common, please choose a stronger one",
            ));
        }

        Ok(())
    }
}

fn is_common_password(password: &str) -> bool {
    let lowered = password.to_lowercase();
    COMMON_PASSWORDS.iter().any(|common| *common == lowered)
}
