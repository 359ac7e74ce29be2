use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a file record.
///
/// Transitions are forward only: active -> expired, active -> deleted,
/// expired -> deleted. Deleted is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Expired,
    Deleted,
}

/// File record model, one row per uploaded blob
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRecord {
    pub id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub file_name: String,
    pub file_hash: String,
    #[serde(skip_serializing)]
    pub blob_ref: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub uploader_address: String,
    pub anonymous_mode: bool,
    pub view_limit: i64,
    pub views_remaining: i64,
    pub expiry_time: String,
    pub anchor_id: String,
    pub anchor_block: Option<i64>,
    pub status: FileStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Metadata returned by preview (never mutates the view counter)
#[derive(Debug, Serialize)]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    /// Omitted when the record was uploaded in anonymous mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader_address: Option<String>,
    pub view_limit: i64,
    pub views_remaining: i64,
    pub expiry_time: String,
    pub file_hash: String,
    pub anchor_id: String,
    pub anchor_block: Option<i64>,
    pub created_at: String,
}

impl From<FileRecord> for FileMetadata {
    fn from(rec: FileRecord) -> Self {
        let uploader_address = if rec.anonymous_mode {
            None
        } else {
            Some(rec.uploader_address)
        };
        Self {
            file_name: rec.file_name,
            file_size: rec.file_size,
            mime_type: rec.mime_type,
            uploader_address,
            view_limit: rec.view_limit,
            views_remaining: rec.views_remaining,
            expiry_time: rec.expiry_time,
            file_hash: rec.file_hash,
            anchor_id: rec.anchor_id,
            anchor_block: rec.anchor_block,
            created_at: rec.created_at,
        }
    }
}

/// Response for a completed upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub access_token: String,
    pub file_hash: String,
    pub anchor_id: String,
    pub anchor_block: Option<i64>,
    pub view_limit: i64,
    pub expiry_time: String,
    pub created_at: String,
}

impl From<FileRecord> for UploadResponse {
    fn from(rec: FileRecord) -> Self {
        Self {
            id: rec.id,
            access_token: rec.access_token,
            file_hash: rec.file_hash,
            anchor_id: rec.anchor_id,
            anchor_block: rec.anchor_block,
            view_limit: rec.view_limit,
            expiry_time: rec.expiry_time,
            created_at: rec.created_at,
        }
    }
}

/// Per-download receipt, reported alongside the streamed bytes
#[derive(Debug, Clone, Serialize)]
pub struct DownloadReceipt {
    pub id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_hash: String,
    pub views_remaining: i64,
    pub anchor_id: String,
}

/// Snapshot of the record as it stood immediately before deletion
#[derive(Debug, Serialize)]
pub struct DeletionReceipt {
    pub id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_hash: String,
    pub uploader_address: String,
    pub views_remaining: i64,
    pub expiry_time: String,
    pub anchor_id: String,
    pub anchor_block: Option<i64>,
    pub deleted_at: String,
}

/// Service-level input for record creation; the caller has already written
/// the blob and computed the content hash.
#[derive(Debug)]
pub struct CreateRecordRequest {
    pub blob_ref: String,
    pub file_name: String,
    pub file_hash: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub uploader_address: String,
    pub anonymous_mode: bool,
    pub view_limit: i64,
    pub expiry_hours: i64,
}

/// Request body for the authorized delete path
#[derive(Debug, Deserialize)]
pub struct DeleteOwnedRequest {
    pub address: String,
    pub message: String,
    pub signature: String,
}

/// Query parameters for hash verification
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub anchor_id: Option<String>,
}
