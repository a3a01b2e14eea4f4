// sqlx::Error -> AppError
// Orphan rules prevent `From<sqlx::Error> for AppError`, so adapters map explicitly.

use vdcmig_core::error::AppError;

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite result codes: https://www.sqlite.org/rescode.html
            Some(code) => match code.as_ref() {
                "5" => AppError::Checkpoint(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Checkpoint(format!("Database full: {}", db_err.message())),
                "2067" | "1555" => AppError::Checkpoint(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                other => AppError::Checkpoint(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => AppError::Checkpoint(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::RowNotFound => AppError::NotFound("checkpoint row".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Checkpoint(format!("Column not found: {}", col)),
        // Connection, pool, protocol errors
        _ => AppError::Checkpoint(err.to_string()),
    }
}
