//! SQLite persistence for declarant-ai
//!
//! Tables: `settings` (key/value overrides), `batch_sessions` (one row per
//! upload) and `session_rows` (one row per data row of an upload).

pub mod sessions;
pub mod settings;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a locked database before SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (creating if needed) the service database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!(path = %db_path.display(), "Connecting to database");

    // Applied to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// One connection only: every `:memory:` connection is a separate database.
pub async fn init_memory_pool() -> declarant_common::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> declarant_common::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_sessions (
            session_id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            agent_type TEXT NOT NULL,
            state TEXT NOT NULL,
            item_count INTEGER NOT NULL,
            classifiable_count INTEGER NOT NULL,
            completed_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            excluded_count INTEGER NOT NULL DEFAULT 0,
            row_errors TEXT NOT NULL DEFAULT '[]',
            error_message TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_rows (
            session_id TEXT NOT NULL,
            row_index INTEGER NOT NULL,
            status TEXT NOT NULL,
            description TEXT NOT NULL,
            quantity REAL,
            unit TEXT,
            attributes TEXT NOT NULL DEFAULT '{}',
            suggested_code TEXT,
            code_description TEXT,
            confidence REAL,
            rationale TEXT,
            alternative_codes TEXT,
            exclusion_reason TEXT,
            note TEXT,
            review_status TEXT NOT NULL DEFAULT 'pending',
            classified_at TEXT,
            PRIMARY KEY (session_id, row_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_batch_sessions_created ON batch_sessions (created_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (settings, batch_sessions, session_rows)");

    Ok(())
}
