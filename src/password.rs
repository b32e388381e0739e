//! Password hashing behind a narrow trait so flows never touch the primitive.

use crate::error::AuthError;
use argon2::{
    Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _, password_hash::SaltString,
};
use rand::rngs::OsRng;

/// Well-formed Argon2id hash with the default cost parameters that no
/// password matches. Verifying against it costs as much as a real check.
pub const DECOY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$Z2F0ZWhvdXNlLWRlY295IQ$+ZXlIWVxBb9SRWOb6GYfRYFVsgZdmDbK2i2yYgvZqek";

pub trait PasswordHasher: Send + Sync {
    /// Produce a self-describing hash string for storage.
    ///
    /// # Errors
    /// `Configuration` if the hasher cannot run.
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// `false` for a wrong password or an unreadable stored hash.
    fn verify(&self, password: &str, stored_hash: &str) -> bool;

    /// Do the work of `verify` when there is no stored hash to check.
    fn verify_decoy(&self, password: &str) {
        let _ = self.verify(password, DECOY_HASH);
    }
}

/// Argon2id with the crate's default parameters, PHC string output.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2PasswordHasher;

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AuthError::Configuration(format!("failed to hash password: {err}")))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        PasswordHash::new(stored_hash).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() -> Result<(), AuthError> {
        let hasher = Argon2PasswordHasher;
        let hash = hasher.hash("correct horse battery")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse battery", &hash));
        assert!(!hasher.verify("wrong horse battery", &hash));
        Ok(())
    }

    #[test]
    fn decoy_uses_default_cost() {
        let parsed = PasswordHash::new(DECOY_HASH).ok();
        let params = parsed.as_ref().map(|hash| &hash.params);
        assert_eq!(
            params.and_then(|p| p.get_decimal("m")),
            Some(argon2::Params::DEFAULT_M_COST)
        );
        assert_eq!(
            params.and_then(|p| p.get_decimal("t")),
            Some(argon2::Params::DEFAULT_T_COST)
        );
        assert_eq!(
            params.and_then(|p| p.get_decimal("p")),
            Some(argon2::Params::DEFAULT_P_COST)
        );
        assert!(!Argon2PasswordHasher.verify("", DECOY_HASH));
        assert!(!Argon2PasswordHasher.verify("correct horse battery", DECOY_HASH));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!Argon2PasswordHasher.verify("anything", "not-a-phc-string"));
    }
}
