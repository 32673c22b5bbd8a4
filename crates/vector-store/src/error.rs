//! Typed errors for the persistence layer: transient lock contention,
//! fatal integrity failures, and data-integrity mismatches.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock contention; retryable at the task level (`DatabaseTransient`).
    #[error("database locked: {0}")]
    Locked(String),
    /// Schema or integrity failure; fatal for the folder (`DatabaseFatal`).
    #[error("database integrity failure: {0}")]
    Integrity(String),
    /// `len(metadataList) != len(vectorList)` or similar mismatch
    /// (`DataIntegrity`).
    #[error("data integrity violation: {0}")]
    CountMismatch(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Classifies a raw rusqlite error the way the corpus's retrieval
    /// store does: a busy/locked database is transient, anything else
    /// reaching this far is treated as fatal.
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Locked(err.to_string())
            }
            _ => StoreError::Sqlite(err),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Locked(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
