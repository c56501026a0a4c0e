//! Opens the embedded SQLite store.
//!
//! Derives the database path from the configured data directory
//! (`<dataDir>/index-<indexName>.sqlite`), enables WAL journaling and a
//! busy timeout so concurrent readers never collide with the single
//! writer, and hands back a pool. Schema migrations run separately via
//! [`crate::schema::run_migrations`].

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::errors::EngineError;

pub async fn connect(config: &Config) -> Result<SqlitePool, EngineError> {
    let db_path = config.db.db_path();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.db.busy_timeout_ms))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;

    Ok(pool)
}

/// Opens a pool at an explicit path, bypassing `Config` — used by tests
/// and by `gno reset` to talk to a database before/without a full config.
pub async fn connect_path(path: &std::path::Path) -> Result<SqlitePool, EngineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| EngineError::ConnectionFailed(e.to_string()))
}
