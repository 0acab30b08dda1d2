//! Error types for the toolforge-store crate.
//!
//! Every store method returns [`StoreError`] via [`StoreResult`].

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A stored value could not be mapped back onto its Rust type.
    #[error("invalid {column} value `{value}`")]
    InvalidColumn { column: &'static str, value: String },

    /// A value cannot be represented in its column.
    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: String },

    /// A blocking task was cancelled or panicked, or the connection
    /// mutex was poisoned.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// Whether this error is a SQLite `UNIQUE` constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StoreError::NotFound {
            entity: "primitive",
            id: "prim_1".into(),
        };
        assert_eq!(err.to_string(), "primitive not found: prim_1");
    }

    #[test]
    fn invalid_column_display() {
        let err = StoreError::InvalidColumn {
            column: "tier",
            value: "gold".into(),
        };
        assert_eq!(err.to_string(), "invalid tier value `gold`");
    }

    #[test]
    fn out_of_range_display() {
        let err = StoreError::OutOfRange {
            field: "timeout_ms",
            value: u64::MAX.to_string(),
        };
        assert_eq!(
            err.to_string(),
            "timeout_ms value 18446744073709551615 is out of range"
        );
    }

    #[test]
    fn non_sqlite_errors_are_not_unique_violations() {
        let err = StoreError::TaskJoin("gone".into());
        assert!(!err.is_unique_violation());
    }
}
