use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::db::Database;
use crate::error::Result;
use crate::models::FileRecord;
use crate::services::lifecycle::now_rfc3339;
use crate::storage::BlobStore;

/// Outcome of a sweep request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Sweep ran; count of reclaimed records
    Completed(u64),
    /// Another sweep was already in flight; this trigger was dropped
    Skipped,
}

/// Reclamation scheduler: periodically purges exhausted and expired
/// records. A process-wide single-flight guard ensures at most one sweep
/// runs at a time; overlapping triggers are dropped, not queued.
pub struct Sweeper {
    db: Database,
    store: Arc<dyn BlobStore>,
    interval: Duration,
    in_flight: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    pub fn new(db: Database, store: Arc<dyn BlobStore>, interval: Duration) -> Self {
        Self {
            db,
            store,
            interval,
            in_flight: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Start the periodic sweep loop.
    pub fn start(self: &Arc<Self>) {
        let sweeper = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.interval);
            // The immediate first tick would race service startup
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweeper.run_sweep().await;
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
        tracing::info!("Reclamation sweeper started (interval {:?})", self.interval);
    }

    /// Stop the periodic loop. Does not interrupt a sweep already running
    /// on another task; per-item work is short and idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
            tracing::info!("Reclamation sweeper stopped");
        }
    }

    /// Fire-and-forget manual trigger; never blocks the caller and never
    /// propagates sweep errors.
    pub fn trigger(self: &Arc<Self>) {
        let sweeper = self.clone();
        tokio::spawn(async move {
            sweeper.run_sweep().await;
        });
    }

    /// Run one sweep, unless one is already in flight.
    pub async fn run_sweep(&self) -> SweepOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sweep already in progress, dropping trigger");
            return SweepOutcome::Skipped;
        }

        let reclaimed = match self.sweep_once().await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Sweep failed: {}", e);
                0
            }
        };

        self.in_flight.store(false, Ordering::SeqCst);
        SweepOutcome::Completed(reclaimed)
    }

    /// One reclamation pass: union (by id) of time-expired and exhausted
    /// active records, each purged best-effort. Per-item failures are
    /// logged and the batch continues; the next sweep retries anything
    /// left behind.
    async fn sweep_once(&self) -> Result<u64> {
        let now = now_rfc3339();

        let time_expired: Vec<FileRecord> = sqlx::query_as(
            "SELECT * FROM file_records WHERE status = 'active' AND expiry_time <= ?",
        )
        .bind(&now)
        .fetch_all(self.db.pool())
        .await?;

        let exhausted: Vec<FileRecord> = sqlx::query_as(
            "SELECT * FROM file_records WHERE status = 'active' AND views_remaining <= 0",
        )
        .fetch_all(self.db.pool())
        .await?;

        // A record may satisfy both conditions; union by identity
        let mut candidates: HashMap<String, FileRecord> = HashMap::new();
        for rec in time_expired.into_iter().chain(exhausted) {
            candidates.insert(rec.id.clone(), rec);
        }

        if candidates.is_empty() {
            return Ok(0);
        }

        tracing::info!("Sweep found {} record(s) to reclaim", candidates.len());

        let mut reclaimed = 0u64;
        for (id, rec) in candidates {
            match self.reclaim(&rec).await {
                Ok(()) => reclaimed += 1,
                Err(e) => {
                    tracing::warn!("Failed to reclaim record {}: {}", id, e);
                }
            }
        }

        tracing::info!("Sweep reclaimed {} record(s)", reclaimed);
        Ok(reclaimed)
    }

    async fn reclaim(&self, rec: &FileRecord) -> Result<()> {
        // An already-absent blob counts as removed
        self.store.delete(&rec.blob_ref).await?;

        sqlx::query("DELETE FROM file_records WHERE id = ?")
            .bind(&rec.id)
            .execute(self.db.pool())
            .await?;

        tracing::debug!("Reclaimed record {} (blob {})", rec.id, rec.blob_ref);
        Ok(())
    }
}
