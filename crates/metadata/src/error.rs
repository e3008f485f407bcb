//! Metadata store error types.

use thiserror::Error;

/// SQLite result codes that mean "try again": BUSY, LOCKED and their
/// extended variants.
const SQLITE_RETRYABLE_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// PostgreSQL serialization failure and deadlock.
const POSTGRES_RETRYABLE_CODES: &[&str] = &["40001", "40P01"];

/// PostgreSQL unique_violation.
const POSTGRES_UNIQUE_VIOLATION: &str = "23505";

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<MetadataError>,
    },
}

impl MetadataError {
    /// Whether the operation may succeed if the whole transaction is re-run.
    pub fn is_retryable(&self) -> bool {
        match self {
            MetadataError::Database(e) => is_retryable_sqlx(e),
            _ => false,
        }
    }

    /// Whether this is a unique-constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            MetadataError::Database(e) => is_unique_violation(e),
            _ => false,
        }
    }
}

impl From<canon_core::Error> for MetadataError {
    fn from(e: canon_core::Error) -> Self {
        MetadataError::Validation(e.to_string())
    }
}

/// Classify a driver error as transient.
pub(crate) fn is_retryable_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code().as_deref()
                && (SQLITE_RETRYABLE_CODES.contains(&code)
                    || POSTGRES_RETRYABLE_CODES.contains(&code))
            {
                return true;
            }
            let msg = db_err.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}

/// Detect a unique-constraint violation on either backend.
///
/// SQLite reports "UNIQUE constraint failed: <table>.<column>", PostgreSQL
/// reports SQLSTATE 23505.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(POSTGRES_UNIQUE_VIOLATION)
                || db_err.message().contains("UNIQUE constraint")
        }
        _ => false,
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
