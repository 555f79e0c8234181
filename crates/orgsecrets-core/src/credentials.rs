//! Password hashing and verification with Argon2id.
//!
//! Hashes are stored as PHC strings (`$argon2id$v=19$...`). Both hashing and
//! verification are CPU-bound and run on the blocking thread pool.
//!
//! Test builds use a cheap parameter set so the suite stays fast.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::AuthError;

/// PHC hash of a random password, verified against when the email is
/// unknown so both login failure paths cost one Argon2 run.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$0mAWxcmpiMMFxkuECm5a0bQnMqGLBKzLFRXh8+VwZ1c";

fn argon2_instance() -> Argon2<'static> {
    if cfg!(test) {
        if let Ok(params) = Params::new(1024, 1, 1, None) {
            return Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        }
    }
    Argon2::default()
}

fn blocking_failed(err: &tokio::task::JoinError) -> AuthError {
    AuthError::Internal {
        reason: format!("password task failed: {err}"),
    }
}

/// Hash `password` into a PHC string.
///
/// # Errors
///
/// Returns [`AuthError::Internal`] if hashing fails or the blocking task
/// panics.
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        argon2_instance()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal {
                reason: format!("password hashing failed: {e}"),
            })
    })
    .await
    .map_err(|e| blocking_failed(&e))?
}

/// Check `password` against a stored PHC hash.
///
/// An unparseable stored hash counts as a mismatch.
///
/// # Errors
///
/// Returns [`AuthError::Internal`] if the blocking task panics.
pub async fn verify_password(password: &str, stored_hash: &str) -> Result<bool, AuthError> {
    let password = password.to_owned();
    let stored_hash = stored_hash.to_owned();
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&stored_hash) else {
            return false;
        };
        argon2_instance()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|e| blocking_failed(&e))
}

/// Burn one verification against a fixed hash.
///
/// Called when a login names an unknown email.
pub async fn verify_dummy(password: &str) {
    let _ = verify_password(password, DUMMY_HASH).await;
}
