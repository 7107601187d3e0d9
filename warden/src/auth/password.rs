use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use super::error::AuthError;

/// Argon2id hasher. Cost parameters only apply to new hashes; verification reads them from the
/// stored PHC string.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a password with a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::PasswordHash(e.to_string()))
    }

    /// Verify a password against a hash using constant-time comparison
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash =
            PasswordHash::new(hash).map_err(|e| AuthError::PasswordHash(e.to_string()))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(1024, 1, 1).unwrap()
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hasher = hasher();
        let hash = hasher.hash("Passw0rd!").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Passw0rd!", &hash).unwrap());
        assert!(!hasher.verify("passw0rd!", &hash).unwrap());
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let hasher = hasher();
        let hash1 = hasher.hash("Passw0rd!").unwrap();
        let hash2 = hasher.hash("Passw0rd!").unwrap();

        // Different hashes due to different salts
        assert_ne!(hash1, hash2);
        assert!(hasher.verify("Passw0rd!", &hash1).unwrap());
        assert!(hasher.verify("Passw0rd!", &hash2).unwrap());
    }

    #[test]
    fn test_verify_uses_parameters_from_hash() {
        let hash = hasher().hash("Passw0rd!").unwrap();
        let stronger = PasswordHasher::new(2048, 2, 1).unwrap();

        assert!(stronger.verify("Passw0rd!", &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        assert!(matches!(
            hasher().verify("Passw0rd!", "not-a-phc-string"),
            Err(AuthError::PasswordHash(_))
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(PasswordHasher::new(1, 1, 1).is_err());
    }
}
