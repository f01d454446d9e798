//! Argon2 password hashing. Hashing is CPU-bound, so the async entry points
//! run it on the blocking pool instead of a runtime worker.
//!
//! Rows imported from the previous deployment still carry bcrypt hashes
//! (`$2a$`, `$2b$`, `$2y$`). Those verify through `bcrypt` and are rehashed
//! to argon2 on the next successful login.

use anyhow::anyhow;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::AppResult;

fn hash_sync(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            error!(error = %e, "argon2 hash failed");
            anyhow!("hash password: {e}")
        })
}

const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

pub fn is_legacy_hash(stored: &str) -> bool {
    BCRYPT_PREFIXES.iter().any(|p| stored.starts_with(p))
}

/// `false` for a wrong password and for a stored hash that cannot be parsed;
/// an unreadable row is a failed login, not a server error.
fn verify_sync(plain: &str, stored: &str) -> bool {
    if is_legacy_hash(stored) {
        return bcrypt::verify(plain, stored).unwrap_or_else(|e| {
            error!(error = %e, "stored bcrypt hash is malformed");
            false
        });
    }
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

pub async fn hash_password(plain: &str) -> AppResult<String> {
    let plain = plain.to_owned();
    let hash = tokio::task::spawn_blocking(move || hash_sync(&plain))
        .await
        .map_err(|e| anyhow!("hash task: {e}"))??;
    Ok(hash)
}

pub async fn verify_password(plain: &str, stored: &str) -> AppResult<bool> {
    let (plain, stored) = (plain.to_owned(), stored.to_owned());
    let ok = tokio::task::spawn_blocking(move || verify_sync(&plain, &stored))
        .await
        .map_err(|e| anyhow!("verify task: {e}"))?;
    Ok(ok)
}
