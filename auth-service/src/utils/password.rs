use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use secrecy::{ExposeSecret, SecretString};

/// Verifier checked when the identifier matches no user, so a miss costs the
/// same Argon2 work as a wrong secret. Default parameters, fixed salt, zero hash.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$ZHVtbXlzYWx0ZHVtbXlzYWx0$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Argon2id PHC string for a user secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHash(String);

impl SecretHash {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash a secret with Argon2id and a fresh random salt.
pub fn hash_secret(secret: &SecretString) -> Result<SecretHash, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(secret.expose_secret().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash secret: {}", e))?
        .to_string();

    Ok(SecretHash::new(hash))
}

/// Constant-time verification against a stored verifier.
///
/// A verifier that cannot be parsed counts as a mismatch.
pub fn verify_secret(secret: &SecretString, hash: &SecretHash) -> bool {
    let parsed = match PasswordHash::new(hash.as_str()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Stored secret hash is malformed");
            return false;
        }
    };

    Argon2::default()
        .verify_password(secret.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

/// Burn one verification worth of time. Always returns `false`.
pub fn dummy_verify(secret: &SecretString) -> bool {
    verify_secret(secret, &SecretHash::new(DUMMY_HASH.to_string()));
    false
}
