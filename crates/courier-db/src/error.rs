//! # Storage Error Types
//!
//! Error types for durable store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError::Storage (courier-sync)                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Engine degrades to memory-only for the session                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use courier_core::CoreError;
use thiserror::Error;

/// Durable store errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// The store could not be opened or initialized.
    ///
    /// ## When This Occurs
    /// - Database file can't be created (permissions, read-only volume)
    /// - Disk full during migration
    /// - The pool was closed
    ///
    /// Every operation on an unavailable store fails with this variant; the
    /// engine treats it as the signal to continue memory-only.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A stored JSON column could not be (de)serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The record violates an entry invariant.
    #[error("Invalid record: {0}")]
    Invalid(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Returns true if the store as a whole is unusable (as opposed to a
    /// single bad query or record).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DbError::Unavailable(_) | DbError::MigrationFailed(_) | DbError::PoolExhausted
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::Database       → DbError::QueryFailed
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::PoolClosed     → DbError::Unavailable
/// sqlx::Error::Io             → DbError::Unavailable
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::Unavailable("Pool is closed".to_string()),
            sqlx::Error::Io(io) => DbError::Unavailable(io.to_string()),
            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(DbError::Unavailable("disk".into()).is_unavailable());
        assert!(DbError::PoolExhausted.is_unavailable());
        assert!(!DbError::QueryFailed("syntax".into()).is_unavailable());
        assert!(!DbError::Invalid(CoreError::Required("id".into())).is_unavailable());
    }

    #[test]
    fn test_pool_closed_maps_to_unavailable() {
        let err = DbError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, DbError::Unavailable(_)));
    }
}
