//! Password hashing and one-time password generation.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use argon2::Argon2;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::backend::{AuthError, BackendError};

pub const MIN_PASSWORD_LEN: usize = 8;

const ONE_TIME_PASSWORD_LEN: usize = 16;

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword(format!(
            "must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Argon2id PHC string for `password`.
pub fn hash_password(password: &str) -> Result<String, BackendError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| BackendError::InvalidData(format!("password hashing failed: {e}")))
}

pub fn verify_password(phc: &str, password: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Random alphanumeric password handed to a freshly provisioned admin exactly once.
pub fn generate_one_time_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ONE_TIME_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
