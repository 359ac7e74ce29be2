use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{
    CreateRecordRequest, DeleteOwnedRequest, DeletionReceipt, FileMetadata, UploadResponse,
    VerificationReport, VerifyQuery,
};
use crate::services::LifecycleService;
use crate::AppState;

/// Staged multipart upload on disk. Removal happens on drop, so every
/// exit path of the handler cleans up, including error returns while
/// later form fields are still being parsed.
struct TempUpload {
    path: PathBuf,
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove temp file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Upload a file and anchor its hash
/// POST /api/v1/files
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResponse>>> {
    let mut temp_upload: Option<TempUpload> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut file_hash: Option<String> = None;
    let mut file_size: i64 = 0;
    let mut uploader_address: Option<String> = None;
    let mut anonymous_mode = false;
    let mut view_limit: i64 = 1;
    let mut expiry_hours: i64 = 24;

    // Process multipart fields
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to process multipart: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());

                // Stream to a temp file, hashing as we go. The guard is
                // armed before the first write so a failed stream does not
                // leave a partial file behind.
                let temp_dir = std::env::temp_dir();
                let guard = TempUpload {
                    path: temp_dir.join(format!("anchorbox_upload_{}", Uuid::new_v4())),
                };

                let mut file = tokio::fs::File::create(&guard.path).await.map_err(|e| {
                    AppError::Internal(format!("Failed to create temp file: {}", e))
                })?;

                let mut hasher = Sha256::new();
                file_size = 0;
                while let Some(chunk) = field.chunk().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read file chunk: {}", e))
                })? {
                    hasher.update(&chunk);
                    file_size += chunk.len() as i64;
                    file.write_all(&chunk).await.map_err(|e| {
                        AppError::Internal(format!("Failed to write to temp file: {}", e))
                    })?;
                }

                file.flush().await.map_err(|e| {
                    AppError::Internal(format!("Failed to flush temp file: {}", e))
                })?;

                file_hash = Some(hex::encode(hasher.finalize()));
                temp_upload = Some(guard);
            }
            "uploader_address" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    uploader_address = Some(text);
                }
            }
            "anonymous" => {
                let text = field.text().await.unwrap_or_default();
                anonymous_mode = matches!(text.as_str(), "1" | "true" | "yes");
            }
            "view_limit" => {
                let text = field.text().await.unwrap_or_default();
                view_limit = text
                    .parse()
                    .map_err(|_| AppError::Validation("Invalid view_limit".to_string()))?;
            }
            "expiry_hours" => {
                let text = field.text().await.unwrap_or_default();
                expiry_hours = text
                    .parse()
                    .map_err(|_| AppError::Validation("Invalid expiry_hours".to_string()))?;
            }
            _ => {}
        }
    }

    let temp =
        temp_upload.ok_or_else(|| AppError::Validation("No file provided".to_string()))?;
    let file_name =
        file_name.ok_or_else(|| AppError::Validation("No file name provided".to_string()))?;
    let file_hash = file_hash.unwrap_or_default();
    let uploader_address = uploader_address
        .ok_or_else(|| AppError::Validation("No uploader address provided".to_string()))?;

    // Write the blob before anchoring; creation order is blob -> hash ->
    // anchor -> row, with blob removal compensating late failures.
    let blob_ref = Uuid::new_v4().to_string();
    state.store.put_file(&blob_ref, &temp.path).await?;
    drop(temp);

    let record = LifecycleService::create_record(
        &state.db,
        state.store.as_ref(),
        &state.anchor,
        &state.config.limits,
        CreateRecordRequest {
            blob_ref,
            file_name,
            file_hash,
            file_size,
            mime_type: content_type,
            uploader_address,
            anonymous_mode,
            view_limit,
            expiry_hours,
        },
    )
    .await?;

    Ok(Json(ApiResponse::success(UploadResponse::from(record))))
}

/// Preview metadata by access token (does not consume a view)
/// GET /api/v1/files/:token/preview
pub async fn preview_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<FileMetadata>>> {
    let metadata = LifecycleService::preview(&state.db, &token).await?;
    Ok(Json(ApiResponse::success(metadata)))
}

/// Download by access token (consumes exactly one view)
/// GET /api/v1/files/:token/download
pub async fn download_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let download = LifecycleService::download(&state.db, state.store.as_ref(), &token).await?;

    // The blob read has completed; an exhausted record can be purged
    // without racing the transfer we are about to serve from memory.
    if download.exhausted {
        let db = state.db.clone();
        let store = state.store.clone();
        let id = download.receipt.id.clone();
        tokio::spawn(async move {
            if let Err(e) = LifecycleService::purge_exhausted(&db, store.as_ref(), &id).await {
                tracing::warn!("Deferred purge failed for record {}: {}", id, e);
            }
        });
    }

    let content_type = download
        .mime_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let fallback_name = download.receipt.file_name.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(&download.receipt.file_name);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, download.data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .header("x-views-remaining", download.receipt.views_remaining)
        .header("x-file-hash", download.receipt.file_hash.clone())
        .header("x-anchor-id", download.receipt.anchor_id.clone())
        .body(Body::from(download.data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// Delete an owned file with a recovered-signature ownership proof
/// POST /api/v1/files/:id/delete
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DeleteOwnedRequest>,
) -> Result<Json<ApiResponse<DeletionReceipt>>> {
    let receipt = LifecycleService::delete_owned(
        &state.db,
        state.store.as_ref(),
        state.recovery.as_ref(),
        &id,
        &req,
    )
    .await?;
    Ok(Json(ApiResponse::success(receipt)))
}

/// Verify a content hash against the ledger
/// GET /api/v1/verify/:hash?anchor_id=xxx
pub async fn verify_hash(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<ApiResponse<VerificationReport>>> {
    let report = LifecycleService::verify(
        &state.db,
        &state.anchor,
        &hash,
        query.anchor_id.as_deref(),
    )
    .await?;
    Ok(Json(ApiResponse::success(report)))
}

/// Trigger an on-demand reclamation sweep (fire-and-forget)
/// POST /api/v1/sweep
pub async fn trigger_sweep(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.sweeper.trigger();
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::<()>::success_message("Sweep triggered")),
    ))
}
