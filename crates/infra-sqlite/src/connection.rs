// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use vdcmig_core::error::{AppError, Result};

/// Create SQLite connection pool with WAL mode.
///
/// `database_url` is either a sqlx URL (`sqlite::memory:`, `sqlite://...`) or a
/// plain file path. The file is created if missing.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = if database_url.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::Config(format!("invalid database url {}: {}", database_url, e)))?
    } else {
        SqliteConnectOptions::new().filename(database_url)
    };
    let options = options
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}
