use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RecoveryConfig;
use crate::error::{AppError, Result};

/// External ownership-authorization collaborator.
///
/// The lifecycle engine never implements signature cryptography itself; it
/// only compares the recovered address against stored/claimed addresses.
#[async_trait]
pub trait SignerRecovery: Send + Sync {
    /// Recover the signer address for a (message, signature) pair.
    async fn recover(&self, message: &str, signature: &str) -> Result<String>;
}

/// Checks the `0x` + 40 hex chars address shape. Case is irrelevant;
/// comparisons elsewhere are case-insensitive.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Serialize)]
struct RecoverRequest<'a> {
    message: &'a str,
    signature: &'a str,
}

#[derive(Deserialize)]
struct RecoverResponse {
    address: String,
}

/// HTTP-backed recovery collaborator
pub struct HttpSignerRecovery {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSignerRecovery {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.endpoint.clone())
    }
}

#[async_trait]
impl SignerRecovery for HttpSignerRecovery {
    async fn recover(&self, message: &str, signature: &str) -> Result<String> {
        let url = format!("{}/recover", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&RecoverRequest { message, signature })
            .send()
            .await?;

        if resp.status().is_client_error() {
            // The collaborator could not make sense of the signature
            return Err(AppError::Forbidden("Signature recovery failed".to_string()));
        }
        let resp = resp.error_for_status()?;
        let body: RecoverResponse = resp.json().await?;
        Ok(body.address)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Recovery stub that always returns the same address.
    pub struct StaticRecovery(pub String);

    #[async_trait]
    impl SignerRecovery for StaticRecovery {
        async fn recover(&self, _message: &str, _signature: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_format_check() {
        assert!(is_valid_address("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(is_valid_address("0x52908400098527886e0f7030069857d2e4169ee7"));
        assert!(!is_valid_address("52908400098527886e0f7030069857d2e4169ee7"));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address("0xZZ908400098527886e0f7030069857d2e4169ee7"));
        assert!(!is_valid_address(""));
    }
}
