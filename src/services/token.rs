use std::future::Future;

use rand::RngCore;

use crate::error::{AppError, Result};

/// Access tokens are 256 bits of entropy, hex encoded.
pub const TOKEN_LEN: usize = 64;

/// Probes against the uniqueness predicate before giving up. Exhausting
/// this bound means the random source or the predicate is broken.
const MAX_GENERATION_ATTEMPTS: u32 = 5;

/// Access token issuer
pub struct TokenService;

impl TokenService {
    /// Generate a uniformly random 64-hex-character token
    pub fn generate() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Generate a token that the caller-supplied predicate reports as unused.
    ///
    /// The predicate returns true when the candidate already exists in the
    /// store.
    pub async fn generate_unique<F, Fut>(exists: F) -> Result<String>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let candidate = Self::generate();
            if !exists(candidate.clone()).await? {
                return Ok(candidate);
            }
        }

        Err(AppError::Internal(format!(
            "Failed to generate a unique access token after {} attempts",
            MAX_GENERATION_ATTEMPTS
        )))
    }

    /// Pure format check: fixed length, hex alphabet. Applied to every
    /// inbound token before any store lookup.
    pub fn validate(token: &str) -> bool {
        token.len() == TOKEN_LEN && token.chars().all(|c| c.is_ascii_hexdigit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_valid_and_distinct() {
        let a = TokenService::generate();
        let b = TokenService::generate();
        assert!(TokenService::validate(&a));
        assert!(TokenService::validate(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn validate_rejects_malformed_tokens() {
        assert!(!TokenService::validate(""));
        assert!(!TokenService::validate("abc123"));
        assert!(!TokenService::validate(&"g".repeat(TOKEN_LEN)));
        assert!(!TokenService::validate(&"a".repeat(TOKEN_LEN + 1)));
        // Uppercase hex is still hex
        assert!(TokenService::validate(&"A".repeat(TOKEN_LEN)));
    }

    #[tokio::test]
    async fn generate_unique_returns_first_unused_candidate() {
        let token = TokenService::generate_unique(|_| async { Ok(false) })
            .await
            .unwrap();
        assert!(TokenService::validate(&token));
    }

    #[tokio::test]
    async fn generate_unique_exhaustion_is_an_internal_error() {
        let err = TokenService::generate_unique(|_| async { Ok(true) })
            .await
            .unwrap_err();
        match err {
            AppError::Internal(_) => {}
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
