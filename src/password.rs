//! Password hashing.
//!
//! bcrypt is CPU-bound, so both operations run on the blocking pool to keep
//! request workers free.

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// bcrypt cost used when none is configured.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
    #[error("Hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Hash a password with the given bcrypt cost.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    let password = password.to_string();
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hashed)
}

/// Compare a password against a stored hash.
///
/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let matched = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await?;
    Ok(matched.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("hunter22", 4).await.unwrap();

        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash).await.unwrap());
        assert!(!verify_password("hunter23", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_hash_is_mismatch() {
        assert!(!verify_password("hunter22", "not-a-hash").await.unwrap());
    }
}
