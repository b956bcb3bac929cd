//! Room password hashing
//!
//! A room keeps only the Argon2 hash of the password its creator supplied.
//! Both operations are CPU-bound; async callers run them on a blocking
//! thread.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use tracing::warn;

use crate::error::{Error, Result};

/// Argon2 cost settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
        }
    }
}

impl HashCost {
    /// Fail if Argon2 would refuse these parameters
    pub fn validate(self) -> Result<()> {
        self.hasher().map(|_| ())
    }

    fn hasher(self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.iterations, Params::DEFAULT_P_COST, None)
            .map_err(|e| Error::Config(format!("Invalid password hashing cost: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash a room password into a PHC string
pub fn hash_password(password: &str, cost: HashCost) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = cost
        .hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Authentication(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string.
///
/// The cost parameters are read from the stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<()> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        warn!("Stored password hash is unreadable: {}", e);
        Error::Authentication("Invalid stored password".into())
    })?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| Error::Authentication("Invalid password".into()))
}
