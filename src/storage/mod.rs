pub mod local;

pub use local::*;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Blob store primitives the lifecycle engine relies on.
///
/// A record owns its blob exclusively via `blob_ref`; nothing else in the
/// system addresses stored bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write blob bytes under the given ref
    async fn put(&self, blob_ref: &str, data: Bytes) -> Result<()>;

    /// Write a blob from a local file path
    /// Default implementation reads the file to memory and calls put
    async fn put_file(&self, blob_ref: &str, local_path: &std::path::Path) -> Result<()> {
        let data = tokio::fs::read(local_path).await?;
        self.put(blob_ref, Bytes::from(data)).await
    }

    /// Read blob bytes
    async fn get(&self, blob_ref: &str) -> Result<Bytes>;

    /// Delete a blob; an already-absent blob is success
    async fn delete(&self, blob_ref: &str) -> Result<()>;

    /// Check whether a blob exists
    async fn exists(&self, blob_ref: &str) -> Result<bool>;
}
