use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::LedgerConfig;
use crate::models::{AnchorEntry, AnchorReceipt};

/// Errors from the external ledger, split by whether retrying can help.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Timeout, connectivity, resource-estimation failure. Retried with
    /// backoff by the anchor client.
    #[error("transient ledger failure: {0}")]
    Transient(String),

    /// Explicit rejection by the ledger or its signer. Never retried.
    #[error("ledger rejected the request: {0}")]
    Rejected(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

/// Bounded retry with exponential backoff, shared by all ledger operations.
///
/// `max_attempts` counts total attempts; the base delay doubles after each
/// failed attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub async fn run<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut delay = self.base_delay;
        let mut attempt: u32 = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(
                        "Ledger op '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                        op,
                        attempt,
                        self.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Ledger op '{}' failed terminally after {} attempt(s): {}",
                        op,
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Black-box anchor store. Absence on fetch is a normal `None`, not an error.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    async fn submit(&self, entry: &AnchorEntry) -> Result<AnchorReceipt, LedgerError>;

    async fn fetch(&self, file_hash: &str) -> Result<Option<AnchorEntry>, LedgerError>;
}

/// HTTP ledger backend
///
/// POST {endpoint}/anchors submits an entry, GET {endpoint}/anchors/{hash}
/// reads one back.
pub struct HttpLedger {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLedger {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    fn classify(e: reqwest::Error) -> LedgerError {
        if e.is_timeout() || e.is_connect() {
            LedgerError::Transient(e.to_string())
        } else {
            LedgerError::Transient(format!("request failed: {}", e))
        }
    }

    fn classify_status(status: StatusCode, body: String) -> LedgerError {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            LedgerError::Transient(format!("ledger returned {}: {}", status, body))
        } else {
            LedgerError::Rejected(format!("ledger returned {}: {}", status, body))
        }
    }
}

#[async_trait]
impl LedgerBackend for HttpLedger {
    async fn submit(&self, entry: &AnchorEntry) -> Result<AnchorReceipt, LedgerError> {
        let url = format!("{}/anchors", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(entry)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        resp.json::<AnchorReceipt>()
            .await
            .map_err(|e| LedgerError::Transient(format!("invalid receipt payload: {}", e)))
    }

    async fn fetch(&self, file_hash: &str) -> Result<Option<AnchorEntry>, LedgerError> {
        let url = format!("{}/anchors/{}", self.endpoint, file_hash);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::classify)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let entry = resp
            .json::<AnchorEntry>()
            .await
            .map_err(|e| LedgerError::Transient(format!("invalid anchor payload: {}", e)))?;
        Ok(Some(entry))
    }
}

/// Ledger anchor client: owns the retry policy so callers never roll their
/// own retry loops.
pub struct AnchorClient {
    backend: Arc<dyn LedgerBackend>,
    retry: RetryPolicy,
}

impl AnchorClient {
    pub fn new(backend: Arc<dyn LedgerBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        let backend = Arc::new(HttpLedger::new(
            config.endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
        ));
        Self::new(
            backend,
            RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.base_delay_ms),
            ),
        )
    }

    /// Write a (hash, timestamp, uploader) triple to the ledger.
    ///
    /// A terminal failure here aborts the whole creation flow in the caller;
    /// the ledger write is the point of no return for an upload.
    pub async fn record_anchor(
        &self,
        file_hash: &str,
        timestamp: i64,
        uploader: &str,
    ) -> Result<AnchorReceipt, LedgerError> {
        let entry = AnchorEntry {
            file_hash: file_hash.to_string(),
            timestamp,
            uploader: uploader.to_string(),
        };
        self.retry
            .run("record_anchor", || {
                let entry = entry.clone();
                let backend = self.backend.clone();
                async move { backend.submit(&entry).await }
            })
            .await
    }

    /// Read an anchor back; absence is a normal `None` result.
    pub async fn get_anchor(&self, file_hash: &str) -> Result<Option<AnchorEntry>, LedgerError> {
        self.retry
            .run("get_anchor", || {
                let backend = self.backend.clone();
                let hash = file_hash.to_string();
                async move { backend.fetch(&hash).await }
            })
            .await
    }

    /// Case-insensitive equality between a caller-supplied hash and an anchor.
    pub fn verify(provided_hash: &str, anchor: &AnchorEntry) -> bool {
        provided_hash.eq_ignore_ascii_case(&anchor.file_hash)
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory ledger for tests: append-only map keyed by hash.
    #[derive(Default)]
    pub struct MemoryLedger {
        pub entries: Mutex<HashMap<String, AnchorEntry>>,
        next_block: AtomicU32,
    }

    #[async_trait]
    impl LedgerBackend for MemoryLedger {
        async fn submit(&self, entry: &AnchorEntry) -> Result<AnchorReceipt, LedgerError> {
            let block = self.next_block.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            self.entries
                .lock()
                .unwrap()
                .insert(entry.file_hash.to_lowercase(), entry.clone());
            Ok(AnchorReceipt {
                anchor_id: format!("anchor-{}", block),
                anchor_block: Some(block),
            })
        }

        async fn fetch(&self, file_hash: &str) -> Result<Option<AnchorEntry>, LedgerError> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .get(&file_hash.to_lowercase())
                .cloned())
        }
    }

    /// Ledger that fails a scripted number of times before succeeding.
    pub struct FlakyLedger {
        pub failures: AtomicU32,
        pub error: fn() -> LedgerError,
        pub inner: MemoryLedger,
        pub calls: AtomicU32,
    }

    impl FlakyLedger {
        pub fn transient(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error: || LedgerError::Transient("connection refused".into()),
                inner: MemoryLedger::default(),
                calls: AtomicU32::new(0),
            }
        }

        pub fn rejecting() -> Self {
            Self {
                failures: AtomicU32::new(u32::MAX),
                error: || LedgerError::Rejected("signer declined".into()),
                inner: MemoryLedger::default(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerBackend for FlakyLedger {
        async fn submit(&self, entry: &AnchorEntry) -> Result<AnchorReceipt, LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != u32::MAX {
                    self.failures.fetch_sub(1, Ordering::SeqCst);
                }
                return Err((self.error)());
            }
            self.inner.submit(entry).await
        }

        async fn fetch(&self, file_hash: &str) -> Result<Option<AnchorEntry>, LedgerError> {
            self.inner.fetch(file_hash).await
        }
    }

    pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn record_then_get_round_trips_case_insensitively() {
        let client = AnchorClient::new(Arc::new(MemoryLedger::default()), fast_retry(3));

        let receipt = client.record_anchor("ABCDEF0123", 1700000000, "0xabc").await.unwrap();
        assert!(receipt.anchor_id.starts_with("anchor-"));

        let anchor = client.get_anchor("abcdef0123").await.unwrap().unwrap();
        assert!(AnchorClient::verify("ABCDEF0123", &anchor));
        assert!(AnchorClient::verify("abcdef0123", &anchor));
        assert_eq!(anchor.uploader, "0xabc");
    }

    #[tokio::test]
    async fn absent_anchor_is_none_not_an_error() {
        let client = AnchorClient::new(Arc::new(MemoryLedger::default()), fast_retry(3));
        assert!(client.get_anchor("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_backoff() {
        let backend = Arc::new(FlakyLedger::transient(2));
        let client = AnchorClient::new(backend.clone(), fast_retry(3));

        let receipt = client.record_anchor("aa", 1, "0xabc").await.unwrap();
        assert_eq!(receipt.anchor_block, Some(1));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhaust_after_max_attempts() {
        let backend = Arc::new(FlakyLedger::transient(10));
        let client = AnchorClient::new(backend.clone(), fast_retry(3));

        let err = client.record_anchor("aa", 1, "0xabc").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejection_fails_immediately_without_retry() {
        let backend = Arc::new(FlakyLedger::rejecting());
        let client = AnchorClient::new(backend.clone(), fast_retry(3));

        let err = client.record_anchor("aa", 1, "0xabc").await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
