use crate::error::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash(plain: &str, cost: u32) -> AppResult<String> {
    bcrypt::hash(plain, cost).map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

/// Verify plaintext against a stored bcrypt hash. Malformed hashes never match.
pub fn verify(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

/// [`hash`] on the blocking pool.
pub async fn hash_blocking(plain: String, cost: u32) -> AppResult<String> {
    tokio::task::spawn_blocking(move || hash(&plain, cost))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
}

pub async fn verify_blocking(plain: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || verify(&plain, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("verify task failed: {}", e)))
}

pub fn validate_new(plain: &str) -> AppResult<()> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hashed = hash("hunter22", 4).unwrap();
        assert_ne!(hashed, "hunter22");
        assert!(verify("hunter22", &hashed));
        assert!(!verify("hunter23", &hashed));
    }

    #[test]
    fn malformed_hash_does_not_match() {
        assert!(!verify("anything", "not-a-bcrypt-hash"));
    }

    #[tokio::test]
    async fn blocking_wrappers_agree() {
        let hashed = hash_blocking("correct horse".into(), 4).await.unwrap();
        assert!(verify_blocking("correct horse".into(), hashed.clone()).await.unwrap());
        assert!(!verify_blocking("wrong horse".into(), hashed).await.unwrap());
    }

    #[test]
    fn short_passwords_rejected() {
        assert!(validate_new("12345").is_err());
        assert!(validate_new("123456").is_ok());
    }
}
