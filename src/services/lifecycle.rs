use bytes::Bytes;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use uuid::Uuid;

use crate::config::LimitsConfig;
use crate::db::{is_busy_error, Database};
use crate::error::{AppError, GoneReason, Result};
use crate::models::{
    CreateRecordRequest, DeleteOwnedRequest, DeletionReceipt, DownloadReceipt, FileMetadata,
    FileRecord, FileStatus, VerificationReport,
};
use crate::services::ledger::AnchorClient;
use crate::services::ownership::{is_valid_address, SignerRecovery};
use crate::services::TokenService;
use crate::storage::BlobStore;

/// Bounded internal retries for SQLite lock contention before surfacing a
/// retryable busy error to the caller.
const STORE_RETRY_ATTEMPTS: u32 = 3;

/// Uniform timestamp format; fixed-width so string comparison orders
/// chronologically in SQL.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn rfc3339_hours_from_now(hours: i64) -> String {
    (Utc::now() + ChronoDuration::hours(hours)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A deadline equal to "now" counts as already expired.
pub fn is_expired(expiry_time: &str, now: &str) -> bool {
    expiry_time <= now
}

/// Result of a successful download
#[derive(Debug)]
pub struct Download {
    pub data: Bytes,
    pub receipt: DownloadReceipt,
    pub mime_type: Option<String>,
    /// The decrement consumed the last view; caller schedules the deferred
    /// purge once the blob read is done.
    pub exhausted: bool,
}

/// File lifecycle state machine
pub struct LifecycleService;

impl LifecycleService {
    /// Full creation sequence. The caller has already written the blob and
    /// computed the content hash; this performs the ledger write (outside
    /// any store transaction), then inserts the record. On any late
    /// failure the blob is removed as a compensating action so no record
    /// without a metadata row survives.
    pub async fn create_record(
        db: &Database,
        store: &dyn BlobStore,
        anchor: &AnchorClient,
        limits: &LimitsConfig,
        req: CreateRecordRequest,
    ) -> Result<FileRecord> {
        // The blob is already on disk; any rejection from here on must
        // remove it, since no row will ever exist for the sweep to find.
        if let Err(e) = Self::validate_request(limits, &req) {
            Self::remove_blob_compensating(store, &req.blob_ref).await;
            return Err(e);
        }

        let file_hash = req.file_hash.to_lowercase();

        // Point of no return: the ledger write must never run inside a
        // store transaction, and a terminal failure aborts the upload.
        let receipt = match anchor
            .record_anchor(&file_hash, Utc::now().timestamp(), &req.uploader_address)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                Self::remove_blob_compensating(store, &req.blob_ref).await;
                return Err(e.into());
            }
        };

        match Self::insert_record(db, &req, &file_hash, &receipt.anchor_id, receipt.anchor_block)
            .await
        {
            Ok(record) => Ok(record),
            Err(e) => {
                // The anchor is append-only and stays orphaned; the blob
                // must not.
                tracing::error!(
                    "Record insert failed after anchor {} was written; orphaning anchor",
                    receipt.anchor_id
                );
                Self::remove_blob_compensating(store, &req.blob_ref).await;
                Err(e)
            }
        }
    }

    fn validate_request(limits: &LimitsConfig, req: &CreateRecordRequest) -> Result<()> {
        if !is_valid_address(&req.uploader_address) {
            return Err(AppError::Validation("Invalid uploader address".to_string()));
        }
        if req.view_limit < 1 || req.view_limit > limits.max_view_limit {
            return Err(AppError::Validation(format!(
                "View limit must be between 1 and {}",
                limits.max_view_limit
            )));
        }
        if req.expiry_hours < limits.min_expiry_hours || req.expiry_hours > limits.max_expiry_hours
        {
            return Err(AppError::Validation(format!(
                "Expiry must be between {} and {} hours",
                limits.min_expiry_hours, limits.max_expiry_hours
            )));
        }
        if req.file_hash.is_empty() || !req.file_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::Validation("Invalid file hash".to_string()));
        }
        Ok(())
    }

    async fn insert_record(
        db: &Database,
        req: &CreateRecordRequest,
        file_hash: &str,
        anchor_id: &str,
        anchor_block: Option<i64>,
    ) -> Result<FileRecord> {
        let access_token = TokenService::generate_unique(|candidate| {
            let db = db.clone();
            async move {
                let count: (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM file_records WHERE access_token = ?")
                        .bind(&candidate)
                        .fetch_one(db.pool())
                        .await?;
                Ok(count.0 > 0)
            }
        })
        .await?;

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let expiry_time = rfc3339_hours_from_now(req.expiry_hours);

        sqlx::query(
            r#"
            INSERT INTO file_records (
                id, access_token, file_name, file_hash, blob_ref, file_size,
                mime_type, uploader_address, anonymous_mode, view_limit,
                views_remaining, expiry_time, anchor_id, anchor_block,
                status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&access_token)
        .bind(&req.file_name)
        .bind(file_hash)
        .bind(&req.blob_ref)
        .bind(req.file_size)
        .bind(&req.mime_type)
        .bind(&req.uploader_address)
        .bind(req.anonymous_mode)
        .bind(req.view_limit)
        .bind(req.view_limit)
        .bind(&expiry_time)
        .bind(anchor_id)
        .bind(anchor_block)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        Self::get_record(db, &id).await
    }

    async fn remove_blob_compensating(store: &dyn BlobStore, blob_ref: &str) {
        if let Err(e) = store.delete(blob_ref).await {
            tracing::error!("Compensating blob removal failed for {}: {}", blob_ref, e);
        }
    }

    /// Get a record by ID
    pub async fn get_record(db: &Database, id: &str) -> Result<FileRecord> {
        sqlx::query_as("SELECT * FROM file_records WHERE id = ?")
            .bind(id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    /// Preview metadata by token. Read-only for the view counter; expiry
    /// and exhaustion are flipped lazily.
    pub async fn preview(db: &Database, token: &str) -> Result<FileMetadata> {
        if !TokenService::validate(token) {
            return Err(AppError::Validation("Malformed access token".to_string()));
        }

        let record: Option<FileRecord> =
            sqlx::query_as("SELECT * FROM file_records WHERE access_token = ?")
                .bind(token)
                .fetch_optional(db.pool())
                .await?;
        let record = record.ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        if record.status != FileStatus::Active {
            return Err(AppError::Gone(GoneReason::FileNotActive));
        }

        let now = now_rfc3339();
        if is_expired(&record.expiry_time, &now) {
            Self::flip_expired(db, &record.id, &now).await?;
            return Err(AppError::Gone(GoneReason::FileExpired));
        }
        if record.views_remaining <= 0 {
            Self::flip_expired(db, &record.id, &now).await?;
            return Err(AppError::Gone(GoneReason::ViewLimitReached));
        }

        Ok(FileMetadata::from(record))
    }

    /// Idempotent lazy flip; a no-op when another actor already moved the
    /// record out of active.
    async fn flip_expired(db: &Database, id: &str, now: &str) -> Result<()> {
        sqlx::query(
            "UPDATE file_records SET status = 'expired', updated_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(now)
        .bind(id)
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Download by token: validates, atomically consumes exactly one view,
    /// then reads the blob after the transaction has committed.
    ///
    /// Lock contention is retried a bounded number of times before
    /// surfacing as a retryable busy error.
    pub async fn download(db: &Database, store: &dyn BlobStore, token: &str) -> Result<Download> {
        let mut attempt: u32 = 0;
        let (record, remaining) = loop {
            match Self::consume_view(db, store, token).await {
                Err(AppError::Database(e)) if is_busy_error(&e) => {
                    attempt += 1;
                    if attempt >= STORE_RETRY_ATTEMPTS {
                        return Err(AppError::Busy(e.to_string()));
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64))
                        .await;
                }
                other => break other?,
            }
        };

        // The decrement has committed; no lock is held across storage I/O.
        let data = store.get(&record.blob_ref).await?;

        Ok(Download {
            data,
            receipt: DownloadReceipt {
                id: record.id.clone(),
                file_name: record.file_name.clone(),
                file_size: record.file_size,
                file_hash: record.file_hash.clone(),
                views_remaining: remaining,
                anchor_id: record.anchor_id.clone(),
            },
            mime_type: record.mime_type.clone(),
            exhausted: remaining == 0,
        })
    }

    /// One pass over the download state machine. All checks are re-applied
    /// in the WHERE guard of the final atomic decrement, so two racing
    /// downloads can never both consume the last view, no matter what each
    /// of them read beforehand.
    async fn consume_view(
        db: &Database,
        store: &dyn BlobStore,
        token: &str,
    ) -> Result<(FileRecord, i64)> {
        if !TokenService::validate(token) {
            return Err(AppError::Validation("Malformed access token".to_string()));
        }

        let record: Option<FileRecord> =
            sqlx::query_as("SELECT * FROM file_records WHERE access_token = ?")
                .bind(token)
                .fetch_optional(db.pool())
                .await?;
        let record = record.ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        if record.status != FileStatus::Active {
            return Err(AppError::Gone(GoneReason::FileNotActive));
        }

        let now = now_rfc3339();
        if is_expired(&record.expiry_time, &now) {
            Self::flip_expired(db, &record.id, &now).await?;
            return Err(AppError::Gone(GoneReason::FileExpired));
        }

        if record.views_remaining <= 0 {
            Self::flip_expired(db, &record.id, &now).await?;
            return Err(AppError::Gone(GoneReason::ViewLimitReached));
        }

        if !store.exists(&record.blob_ref).await? {
            // The bytes are gone; the record can never be served again.
            sqlx::query(
                "UPDATE file_records SET status = 'deleted', updated_at = ? WHERE id = ? AND status != 'deleted'",
            )
            .bind(&now)
            .bind(&record.id)
            .execute(db.pool())
            .await?;
            return Err(AppError::BlobMissing);
        }

        // Single-statement transaction: decrement and read back atomically,
        // guarded against concurrent transitions.
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE file_records
            SET views_remaining = views_remaining - 1, updated_at = ?
            WHERE id = ? AND status = 'active' AND views_remaining > 0
            RETURNING views_remaining
            "#,
        )
        .bind(&now)
        .bind(&record.id)
        .fetch_optional(db.pool())
        .await?;

        match remaining {
            Some(remaining) => Ok((record, remaining)),
            // A concurrent download consumed the last view after our read
            None => Err(AppError::Gone(GoneReason::ViewLimitReached)),
        }
    }

    /// Deferred purge for an exhausted record, run after the blob read has
    /// completed. Re-checks state and no-ops if another actor already
    /// transitioned the record.
    pub async fn purge_exhausted(db: &Database, store: &dyn BlobStore, id: &str) -> Result<bool> {
        let record: Option<FileRecord> =
            sqlx::query_as("SELECT * FROM file_records WHERE id = ?")
                .bind(id)
                .fetch_optional(db.pool())
                .await?;
        let record = match record {
            Some(r) => r,
            None => return Ok(false),
        };

        if record.status != FileStatus::Active || record.views_remaining > 0 {
            return Ok(false);
        }

        if let Err(e) = store.delete(&record.blob_ref).await {
            // Leave the record to the next sweep
            tracing::warn!("Deferred purge could not remove blob {}: {}", record.blob_ref, e);
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE file_records SET status = 'deleted', updated_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Authorized delete: the recovered signer must match both the claimed
    /// address and the record's uploader (case-insensitive).
    pub async fn delete_owned(
        db: &Database,
        store: &dyn BlobStore,
        recovery: &dyn SignerRecovery,
        file_id: &str,
        req: &DeleteOwnedRequest,
    ) -> Result<DeletionReceipt> {
        if !is_valid_address(&req.address) {
            return Err(AppError::Validation("Invalid address".to_string()));
        }

        let record = Self::get_record(db, file_id).await?;

        let recovered = recovery.recover(&req.message, &req.signature).await?;
        if !recovered.eq_ignore_ascii_case(&req.address) {
            return Err(AppError::Forbidden(
                "Signature does not match the claimed address".to_string(),
            ));
        }
        if !req.address.eq_ignore_ascii_case(&record.uploader_address) {
            return Err(AppError::Forbidden(
                "Only the uploader can delete this file".to_string(),
            ));
        }

        if record.status == FileStatus::Deleted {
            return Err(AppError::Gone(GoneReason::AlreadyDeleted));
        }

        store.delete(&record.blob_ref).await?;

        let now = now_rfc3339();
        let result = sqlx::query(
            "UPDATE file_records SET status = 'deleted', updated_at = ? WHERE id = ? AND status != 'deleted'",
        )
        .bind(&now)
        .bind(&record.id)
        .execute(db.pool())
        .await?;

        if result.rows_affected() == 0 {
            // Another actor deleted the record between load and write
            return Err(AppError::Gone(GoneReason::AlreadyDeleted));
        }

        Ok(DeletionReceipt {
            id: record.id,
            file_name: record.file_name,
            file_size: record.file_size,
            file_hash: record.file_hash,
            uploader_address: record.uploader_address,
            views_remaining: record.views_remaining,
            expiry_time: record.expiry_time,
            anchor_id: record.anchor_id,
            anchor_block: record.anchor_block,
            deleted_at: now,
        })
    }

    /// Compare a caller-supplied hash against the ledger. A supplied anchor
    /// id is cross-checked against the stored record for that hash, since
    /// the ledger itself is keyed by hash only.
    pub async fn verify(
        db: &Database,
        anchor: &AnchorClient,
        provided_hash: &str,
        anchor_id: Option<&str>,
    ) -> Result<VerificationReport> {
        if provided_hash.is_empty() || !provided_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::Validation("Invalid hash".to_string()));
        }

        let entry = anchor.get_anchor(&provided_hash.to_lowercase()).await?;
        let entry = match entry {
            Some(e) => e,
            None => {
                return Ok(VerificationReport {
                    verified: false,
                    provided_hash: provided_hash.to_string(),
                    anchored_hash: None,
                    timestamp: None,
                    uploader: None,
                })
            }
        };

        let mut verified = AnchorClient::verify(provided_hash, &entry);

        if let Some(expected_id) = anchor_id {
            let record: Option<FileRecord> =
                sqlx::query_as("SELECT * FROM file_records WHERE file_hash = ? LIMIT 1")
                    .bind(provided_hash.to_lowercase())
                    .fetch_optional(db.pool())
                    .await?;
            match record {
                Some(r) if r.anchor_id == expected_id => {}
                _ => verified = false,
            }
        }

        Ok(VerificationReport {
            verified,
            provided_hash: provided_hash.to_string(),
            anchored_hash: Some(entry.file_hash),
            timestamp: Some(entry.timestamp),
            uploader: Some(entry.uploader),
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::*;
    use super::*;
    use crate::services::ledger::testing::{fast_retry, FlakyLedger};
    use crate::services::ownership::testing::StaticRecovery;

    fn delete_request(address: &str) -> DeleteOwnedRequest {
        DeleteOwnedRequest {
            address: address.to_string(),
            message: "delete my file".to_string(),
            signature: "0xsig".to_string(),
        }
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let t = "2026-08-30T12:00:00.000Z";
        assert!(is_expired(t, t));
        assert!(is_expired("2026-08-30T11:59:59.999Z", t));
        assert!(!is_expired("2026-08-30T12:00:00.001Z", t));
    }

    #[tokio::test]
    async fn create_populates_anchor_and_full_view_budget() {
        let env = env().await;
        let rec = create(&env, 5).await;

        assert_eq!(rec.status, FileStatus::Active);
        assert_eq!(rec.view_limit, 5);
        assert_eq!(rec.views_remaining, 5);
        assert!(!rec.anchor_id.is_empty());
        assert_eq!(rec.file_hash, "ab".repeat(32));
        assert!(TokenService::validate(&rec.access_token));
    }

    #[tokio::test]
    async fn create_rejects_out_of_bound_limits() {
        let env = env().await;
        let mut req = request("blob", 0);
        let err = LifecycleService::create_record(
            &env.db,
            env.store.as_ref(),
            &env.anchor,
            &env.limits,
            req,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        req = request("blob", 1);
        req.expiry_hours = 10_000;
        let err = LifecycleService::create_record(
            &env.db,
            env.store.as_ref(),
            &env.anchor,
            &env.limits,
            req,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn create_validation_failure_removes_staged_blob() {
        let env = env().await;
        let blob_ref = "staged-0001";
        env.store
            .put(blob_ref, bytes::Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let err = LifecycleService::create_record(
            &env.db,
            env.store.as_ref(),
            &env.anchor,
            &env.limits,
            request(blob_ref, 0),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // No row exists, so nothing would ever sweep the blob
        assert!(!env.store.exists(blob_ref).await.unwrap());
    }

    #[tokio::test]
    async fn create_aborts_and_removes_blob_when_anchor_retries_exhaust() {
        let env = env().await;
        let anchor = AnchorClient::new(Arc::new(FlakyLedger::transient(10)), fast_retry(3));

        let blob_ref = "cafebabe-0001";
        env.store
            .put(blob_ref, bytes::Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let err = LifecycleService::create_record(
            &env.db,
            env.store.as_ref(),
            &anchor,
            &env.limits,
            request(blob_ref, 3),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Ledger(_)));

        // Compensation: no orphaned blob, no row
        assert!(!env.store.exists(blob_ref).await.unwrap());
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM file_records")
            .fetch_one(env.db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn preview_returns_metadata_without_consuming_a_view() {
        let env = env().await;
        let rec = create(&env, 2).await;

        let meta = LifecycleService::preview(&env.db, &rec.access_token)
            .await
            .unwrap();
        assert_eq!(meta.views_remaining, 2);
        assert_eq!(meta.uploader_address.as_deref(), Some(UPLOADER));

        let after = LifecycleService::get_record(&env.db, &rec.id).await.unwrap();
        assert_eq!(after.views_remaining, 2);
    }

    #[tokio::test]
    async fn preview_hides_uploader_in_anonymous_mode() {
        let env = env().await;
        let blob_ref = "anon-blob";
        env.store
            .put(blob_ref, bytes::Bytes::from_static(b"payload"))
            .await
            .unwrap();
        let mut req = request(blob_ref, 1);
        req.anonymous_mode = true;
        let rec = LifecycleService::create_record(
            &env.db,
            env.store.as_ref(),
            &env.anchor,
            &env.limits,
            req,
        )
        .await
        .unwrap();

        let meta = LifecycleService::preview(&env.db, &rec.access_token)
            .await
            .unwrap();
        assert!(meta.uploader_address.is_none());
    }

    #[tokio::test]
    async fn preview_rejects_malformed_token_before_any_lookup() {
        let env = env().await;
        let err = LifecycleService::preview(&env.db, "not-a-token")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn preview_of_pre_expired_record_flips_and_reports_gone() {
        // Scenario B: deadline already in the past; the row survives until
        // swept or deleted.
        let env = env().await;
        let rec = create(&env, 3).await;
        force_expiry(&env.db, &rec.id, "2020-01-01T00:00:00.000Z").await;

        let err = LifecycleService::preview(&env.db, &rec.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Gone(GoneReason::FileExpired)));

        let after = LifecycleService::get_record(&env.db, &rec.id).await.unwrap();
        assert_eq!(after.status, FileStatus::Expired);
        assert!(env.store.exists(&after.blob_ref).await.unwrap());
    }

    #[tokio::test]
    async fn download_consumes_exactly_one_view_and_serves_bytes() {
        let env = env().await;
        let rec = create(&env, 2).await;

        let dl = LifecycleService::download(&env.db, env.store.as_ref(), &rec.access_token)
            .await
            .unwrap();
        assert_eq!(dl.data.as_ref(), b"payload");
        assert_eq!(dl.receipt.views_remaining, 1);
        assert!(!dl.exhausted);

        let after = LifecycleService::get_record(&env.db, &rec.id).await.unwrap();
        assert_eq!(after.views_remaining, 1);
        assert_eq!(after.status, FileStatus::Active);
    }

    #[tokio::test]
    async fn single_view_record_exhausts_then_purges_then_goes_gone() {
        // Scenario A
        let env = env().await;
        let rec = create(&env, 1).await;

        let dl = LifecycleService::download(&env.db, env.store.as_ref(), &rec.access_token)
            .await
            .unwrap();
        assert!(dl.exhausted);
        assert_eq!(dl.receipt.views_remaining, 0);

        let purged =
            LifecycleService::purge_exhausted(&env.db, env.store.as_ref(), &rec.id)
                .await
                .unwrap();
        assert!(purged);

        let after = LifecycleService::get_record(&env.db, &rec.id).await.unwrap();
        assert_eq!(after.status, FileStatus::Deleted);
        assert!(!env.store.exists(&after.blob_ref).await.unwrap());

        let err = LifecycleService::download(&env.db, env.store.as_ref(), &rec.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Gone(_)));
    }

    #[tokio::test]
    async fn purge_is_a_no_op_when_record_already_transitioned() {
        let env = env().await;
        let rec = create(&env, 2).await;
        // Still has views: nothing to purge
        let purged =
            LifecycleService::purge_exhausted(&env.db, env.store.as_ref(), &rec.id)
                .await
                .unwrap();
        assert!(!purged);
        assert!(env.store.exists(&rec.blob_ref).await.unwrap());
    }

    #[tokio::test]
    async fn download_of_expired_record_flips_status() {
        let env = env().await;
        let rec = create(&env, 3).await;
        force_expiry(&env.db, &rec.id, "2020-01-01T00:00:00.000Z").await;

        let err = LifecycleService::download(&env.db, env.store.as_ref(), &rec.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Gone(GoneReason::FileExpired)));

        let after = LifecycleService::get_record(&env.db, &rec.id).await.unwrap();
        assert_eq!(after.status, FileStatus::Expired);
        assert_eq!(after.views_remaining, 3);
    }

    #[tokio::test]
    async fn download_with_missing_blob_marks_record_deleted() {
        let env = env().await;
        let rec = create(&env, 3).await;
        env.store.delete(&rec.blob_ref).await.unwrap();

        let err = LifecycleService::download(&env.db, env.store.as_ref(), &rec.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BlobMissing));

        let after = LifecycleService::get_record(&env.db, &rec.id).await.unwrap();
        assert_eq!(after.status, FileStatus::Deleted);
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let env = env().await;
        let err = LifecycleService::download(&env.db, env.store.as_ref(), &"0".repeat(64))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_downloads_consume_exactly_the_available_views() {
        let env = env().await;
        let rec = create(&env, 3).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let db = env.db.clone();
            let store = env.store.clone();
            let token = rec.access_token.clone();
            handles.push(tokio::spawn(async move {
                LifecycleService::download(&db, store.as_ref(), &token).await
            }));
        }

        let mut ok = 0;
        let mut gone = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AppError::Gone(_)) => gone += 1,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }

        assert_eq!(ok, 3);
        assert_eq!(gone, 7);

        let after = LifecycleService::get_record(&env.db, &rec.id).await.unwrap();
        assert_eq!(after.views_remaining, 0);
    }

    #[tokio::test]
    async fn delete_owned_returns_receipt_then_already_deleted() {
        let env = env().await;
        let rec = create(&env, 5).await;
        let recovery = StaticRecovery(UPLOADER.to_uppercase().replace("0X", "0x"));

        let receipt = LifecycleService::delete_owned(
            &env.db,
            env.store.as_ref(),
            &recovery,
            &rec.id,
            &delete_request(UPLOADER),
        )
        .await
        .unwrap();
        assert_eq!(receipt.id, rec.id);
        assert_eq!(receipt.views_remaining, 5);
        assert_eq!(receipt.anchor_id, rec.anchor_id);
        assert!(!env.store.exists(&rec.blob_ref).await.unwrap());

        let err = LifecycleService::delete_owned(
            &env.db,
            env.store.as_ref(),
            &recovery,
            &rec.id,
            &delete_request(UPLOADER),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Gone(GoneReason::AlreadyDeleted)));
    }

    #[tokio::test]
    async fn delete_owned_with_foreign_signer_is_forbidden() {
        // Scenario D
        let env = env().await;
        let rec = create(&env, 5).await;
        let recovery = StaticRecovery("0x0000000000000000000000000000000000000bad".to_string());

        let err = LifecycleService::delete_owned(
            &env.db,
            env.store.as_ref(),
            &recovery,
            &rec.id,
            &delete_request(UPLOADER),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let after = LifecycleService::get_record(&env.db, &rec.id).await.unwrap();
        assert_eq!(after.status, FileStatus::Active);
        assert_eq!(after.views_remaining, 5);
        assert!(env.store.exists(&after.blob_ref).await.unwrap());
    }

    #[tokio::test]
    async fn delete_owned_claimed_address_must_match_uploader() {
        let env = env().await;
        let rec = create(&env, 5).await;
        let other = "0x0000000000000000000000000000000000000bad";
        // Signature is genuinely from `other`, but `other` is not the uploader
        let recovery = StaticRecovery(other.to_string());

        let err = LifecycleService::delete_owned(
            &env.db,
            env.store.as_ref(),
            &recovery,
            &rec.id,
            &delete_request(other),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn delete_owned_unknown_id_is_not_found() {
        let env = env().await;
        let recovery = StaticRecovery(UPLOADER.to_string());
        let err = LifecycleService::delete_owned(
            &env.db,
            env.store.as_ref(),
            &recovery,
            "missing-id",
            &delete_request(UPLOADER),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn verify_matches_anchored_hash_case_insensitively() {
        let env = env().await;
        let rec = create(&env, 1).await;

        let report = LifecycleService::verify(
            &env.db,
            &env.anchor,
            &rec.file_hash.to_uppercase(),
            None,
        )
        .await
        .unwrap();
        assert!(report.verified);
        assert_eq!(report.anchored_hash.as_deref(), Some(rec.file_hash.as_str()));
        assert_eq!(report.uploader.as_deref(), Some(UPLOADER));
    }

    #[tokio::test]
    async fn verify_with_unknown_hash_reports_unverified() {
        let env = env().await;
        let report = LifecycleService::verify(&env.db, &env.anchor, &"cd".repeat(32), None)
            .await
            .unwrap();
        assert!(!report.verified);
        assert!(report.anchored_hash.is_none());
    }

    #[tokio::test]
    async fn verify_cross_checks_supplied_anchor_id() {
        let env = env().await;
        let rec = create(&env, 1).await;

        let report = LifecycleService::verify(
            &env.db,
            &env.anchor,
            &rec.file_hash,
            Some(rec.anchor_id.as_str()),
        )
        .await
        .unwrap();
        assert!(report.verified);

        let report = LifecycleService::verify(
            &env.db,
            &env.anchor,
            &rec.file_hash,
            Some("anchor-wrong"),
        )
        .await
        .unwrap();
        assert!(!report.verified);
    }
}
