//! # Error Types
//!
//! Domain-specific error types for courier-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  courier-core errors (this file)                                       │
//! │  └── CoreError        - Entry invariants, parse failures               │
//! │                                                                         │
//! │  courier-db errors (separate crate)                                    │
//! │  └── DbError          - Storage failures (StorageError)                │
//! │                                                                         │
//! │  courier-sync errors (separate crate)                                  │
//! │  └── SyncError        - Transport, shape, permanent outbox failures    │
//! │                                                                         │
//! │  Flow: CoreError → DbError → SyncError → status.last_error             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Core engine errors.
///
/// These represent violated invariants on the persisted entry types or
/// values that cannot be parsed into the engine's vocabulary.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A cache entry violates `expires_at > timestamp`.
    #[error("Cache entry {id} is invalid: {reason}")]
    InvalidCacheEntry { id: String, reason: String },

    /// An outbox entry violates `retry_count <= max_retries`.
    #[error("Outbox entry {id} is invalid: {reason}")]
    InvalidOutboxEntry { id: String, reason: String },

    /// HTTP method string is not one the outbox can replay.
    #[error("Unknown HTTP method: {0}")]
    UnknownMethod(String),

    /// A required field is missing or empty.
    #[error("Field '{0}' is required")]
    Required(String),
}
