use tokio::sync::OnceCell;
use tracing::warn;

use crate::error::AppError;

/// bcrypt silently truncates input beyond this many bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

const DUMMY_PASSWORD: &str = "commercium-dummy-password";

/// bcrypt hashing on the blocking pool.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    dummy_hash: OnceCell<String>,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost,
            dummy_hash: OnceCell::new(),
        }
    }

    pub async fn hash(&self, password: &str) -> Result<String, AppError> {
        let password = password.to_owned();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::InternalError(format!("Password hashing task failed: {}", e)))?
            .map_err(|e| AppError::InternalError(format!("Password hashing failed: {}", e)))
    }

    /// A stored hash bcrypt cannot parse counts as a mismatch.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AppError::InternalError(format!("Password verification task failed: {}", e)))?;

        match outcome {
            Ok(matches) => Ok(matches),
            Err(e) => {
                warn!(error = %e, "stored password hash could not be verified");
                Ok(false)
            }
        }
    }

    /// Spends one verification at the configured cost against a throwaway
    /// hash. Login runs this when no account matches, so the response time
    /// does not tell unknown identifiers apart from wrong passwords.
    pub async fn verify_absent(&self, password: &str) -> Result<(), AppError> {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await?;
        self.verify(password, dummy).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn has_dummy_hash(&self) -> bool {
        self.dummy_hash.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hasher = PasswordHasher::new(4);
        let hash = hasher.hash("Secret123!").await.unwrap();

        assert_ne!(hash, "Secret123!");
        assert!(hasher.verify("Secret123!", &hash).await.unwrap());
        assert!(!hasher.verify("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_hashes_are_salted() {
        let hasher = PasswordHasher::new(4);
        let first = hasher.hash("Secret123!").await.unwrap();
        let second = hasher.hash("Secret123!").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_malformed_hash_fails_closed() {
        let hasher = PasswordHasher::new(4);
        assert!(!hasher.verify("Secret123!", "not-a-bcrypt-hash").await.unwrap());
        assert!(!hasher.verify("Secret123!", "").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_absent_reuses_one_hash() {
        let hasher = PasswordHasher::new(4);
        hasher.verify_absent("Secret123!").await.unwrap();
        let first = hasher.dummy_hash.get().cloned().unwrap();

        hasher.verify_absent("other").await.unwrap();
        assert_eq!(hasher.dummy_hash.get(), Some(&first));
        assert!(first.starts_with("$2"));
    }
}
