use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

/// Bounded wait for the SQLite write lock before a busy error surfaces.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_records (
                id TEXT PRIMARY KEY,
                access_token TEXT UNIQUE NOT NULL,
                file_name TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                blob_ref TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mime_type TEXT,
                uploader_address TEXT NOT NULL,
                anonymous_mode INTEGER NOT NULL DEFAULT 0,
                view_limit INTEGER NOT NULL,
                views_remaining INTEGER NOT NULL,
                expiry_time TEXT NOT NULL,
                anchor_id TEXT NOT NULL,
                anchor_block INTEGER,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Sweep queries walk these two index prefixes
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_records_status_expiry ON file_records(status, expiry_time)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_records_status_views ON file_records(status, views_remaining)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_records_file_hash ON file_records(file_hash)",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

/// Whether a sqlx error is SQLite lock contention (retryable).
pub fn is_busy_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}
