//! Shared-secret hashing and verification.
//!
//! The secret is hashed exactly once (Argon2id, random salt) when the gate is
//! bootstrapped; only the PHC digest string is kept afterwards. Verification
//! re-derives the hash with the digest's own parameters and compares outputs in
//! constant time, so neither timing nor early exits reveal where an attempt
//! differs from the secret.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHashString, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Shortest secret the gate accepts.
pub const MIN_SECRET_LENGTH: usize = 8;

const SALT_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("gate secret must be at least {MIN_SECRET_LENGTH} characters long")]
    SecretTooShort,
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
    #[error("failed to hash gate secret: {0}")]
    Hash(String),
}

/// Hash the gate secret into a PHC digest string.
///
/// # Errors
/// Returns an error if the secret is too short or hashing fails.
pub fn hash_secret(
    secret: &SecretString,
    params: Params,
) -> Result<PasswordHashString, CredentialError> {
    let value = secret.expose_secret();
    if value.chars().count() < MIN_SECRET_LENGTH {
        return Err(CredentialError::SecretTooShort);
    }

    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);
    let salt =
        SaltString::encode_b64(&salt).map_err(|err| CredentialError::Hash(err.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let hash = argon2
        .hash_password(value.as_bytes(), &salt)
        .map_err(|err| CredentialError::Hash(err.to_string()))?;

    Ok(hash.serialize())
}

/// Check an attempt against a digest produced by [`hash_secret`].
///
/// Any mismatch, including a length mismatch, is reported the same way.
#[must_use]
pub fn verify_secret(attempt: &str, digest: &PasswordHashString) -> bool {
    Argon2::default()
        .verify_password(attempt.as_bytes(), &digest.password_hash())
        .is_ok()
}

/// Holds the secret digest for the lifetime of the process.
pub struct CredentialVerifier {
    digest: PasswordHashString,
}

impl CredentialVerifier {
    /// Hash the secret with the default Argon2 parameters.
    ///
    /// # Errors
    /// Returns an error if the secret is too short or hashing fails.
    pub fn new(secret: &SecretString) -> Result<Self, CredentialError> {
        Self::with_params(secret, Params::default())
    }

    /// Hash the secret with explicit Argon2 cost parameters.
    ///
    /// # Errors
    /// Returns an error if the secret is too short or hashing fails.
    pub fn with_params(secret: &SecretString, params: Params) -> Result<Self, CredentialError> {
        let digest = hash_secret(secret, params)?;
        Ok(Self { digest })
    }

    /// Build Argon2 parameters from raw costs.
    ///
    /// # Errors
    /// Returns an error if the costs are outside what Argon2 supports.
    pub fn params(m_cost_kib: u32, t_cost: u32, p_cost: u32) -> Result<Params, CredentialError> {
        Params::new(m_cost_kib, t_cost, p_cost, None)
            .map_err(|err| CredentialError::Params(err.to_string()))
    }

    #[must_use]
    pub fn verify(&self, attempt: &str) -> bool {
        verify_secret(attempt, &self.digest)
    }
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("digest", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn cheap_params() -> Result<Params> {
        Ok(CredentialVerifier::params(Params::MIN_M_COST, 1, 1)?)
    }

    #[test]
    fn verify_accepts_the_secret() -> Result<()> {
        let secret = SecretString::from("correct horse battery".to_string());
        let verifier = CredentialVerifier::with_params(&secret, cheap_params()?)?;
        assert!(verifier.verify("correct horse battery"));
        Ok(())
    }

    #[test]
    fn verify_rejects_everything_else() -> Result<()> {
        let secret = SecretString::from("correct horse battery".to_string());
        let verifier = CredentialVerifier::with_params(&secret, cheap_params()?)?;
        for attempt in [
            "",
            "c",
            "correct horse batter",
            "correct horse battery ",
            "Correct horse battery",
            "correct horse battery staple",
        ] {
            assert!(!verifier.verify(attempt), "accepted {attempt:?}");
        }
        Ok(())
    }

    #[test]
    fn hash_secret_salts_every_digest() -> Result<()> {
        let secret = SecretString::from("correct horse battery".to_string());
        let first = hash_secret(&secret, cheap_params()?)?;
        let second = hash_secret(&secret, cheap_params()?)?;
        assert_ne!(first.as_str(), second.as_str());
        assert!(verify_secret("correct horse battery", &first));
        assert!(verify_secret("correct horse battery", &second));
        Ok(())
    }

    #[test]
    fn digest_never_contains_the_secret() -> Result<()> {
        let secret = SecretString::from("plaintext-marker".to_string());
        let digest = hash_secret(&secret, cheap_params()?)?;
        assert!(digest.as_str().starts_with("$argon2id$"));
        assert!(!digest.as_str().contains("plaintext-marker"));
        Ok(())
    }

    #[test]
    fn short_secret_is_rejected() -> Result<()> {
        let secret = SecretString::from("short".to_string());
        let result = CredentialVerifier::with_params(&secret, cheap_params()?);
        assert!(matches!(result, Err(CredentialError::SecretTooShort)));
        Ok(())
    }

    #[test]
    fn debug_hides_digest() -> Result<()> {
        let secret = SecretString::from("correct horse battery".to_string());
        let verifier = CredentialVerifier::with_params(&secret, cheap_params()?)?;
        let rendered = format!("{verifier:?}");
        assert!(!rendered.contains("argon2"));
        Ok(())
    }
}
