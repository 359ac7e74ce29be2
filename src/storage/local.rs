use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

/// Local file system blob store
///
/// Blobs are sharded into subdirectories by ref prefix to keep directory
/// fanout bounded.
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn get_full_path(&self, blob_ref: &str) -> PathBuf {
        let shard = if blob_ref.len() >= 2 {
            &blob_ref[..2]
        } else {
            "00"
        };
        self.base_path.join(shard).join(blob_ref)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, blob_ref: &str, data: Bytes) -> Result<()> {
        let full_path = self.get_full_path(blob_ref);

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write file
        let mut file = fs::File::create(&full_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;

        tracing::debug!("Saved blob to {:?}", full_path);
        Ok(())
    }

    async fn put_file(&self, blob_ref: &str, local_path: &std::path::Path) -> Result<()> {
        let full_path = self.get_full_path(blob_ref);

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Copy file
        fs::copy(local_path, &full_path).await?;
        tracing::debug!("Copied blob from {:?} to {:?}", local_path, full_path);
        Ok(())
    }

    async fn get(&self, blob_ref: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(blob_ref);

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::BlobMissing
            } else {
                AppError::Storage(format!("Failed to read blob: {}", e))
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn delete(&self, blob_ref: &str) -> Result<()> {
        let full_path = self.get_full_path(blob_ref);

        if full_path.exists() {
            fs::remove_file(&full_path).await?;
            tracing::debug!("Deleted blob {:?}", full_path);

            // Try to remove an emptied shard directory
            if let Some(dir) = full_path.parent() {
                if dir != self.base_path {
                    match fs::read_dir(dir).await {
                        Ok(mut entries) => {
                            if entries.next_entry().await?.is_none() {
                                let _ = fs::remove_dir(dir).await;
                            }
                        }
                        Err(_) => {}
                    }
                }
            }
        }

        Ok(())
    }

    async fn exists(&self, blob_ref: &str) -> Result<bool> {
        let full_path = self.get_full_path(blob_ref);
        Ok(full_path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        store
            .put("abcdef", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert!(store.exists("abcdef").await.unwrap());
        assert_eq!(store.get("abcdef").await.unwrap().as_ref(), b"hello");

        store.delete("abcdef").await.unwrap();
        assert!(!store.exists("abcdef").await.unwrap());
    }

    #[tokio::test]
    async fn delete_tolerates_absent_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.delete("never-written").await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_blob_maps_to_blob_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        match store.get("nope00").await {
            Err(AppError::BlobMissing) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
