//! # Sync Error Types
//!
//! Error types for engine operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Storage             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  Storage (DbError)      │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  → memory-only          │ │
//! │  │  ConfigLoad     │  │  HttpStatus     │  │                         │ │
//! │  └─────────────────┘  │  Unreachable    │  └─────────────────────────┘ │
//! │                       └─────────────────┘                              │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Shape       │  │    Snapshot     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Shape          │  │  Snapshot       │  │  NoSyncFunction         │ │
//! │  │  Serialization  │  │  (best effort)  │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these ever stop the engine: transport errors fall back to the
//! cache, storage errors switch to memory-only, shape errors become an
//! empty list.

use courier_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Invalid URL (base URL or request target).
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Request could not be sent or the response could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request timed out (carries the target URL).
    #[error("Request to {0} timed out")]
    Timeout(String),

    /// The service answered with a non-2xx status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// No health endpoint answered with 2xx.
    #[error("Order service unreachable: health check failed")]
    Unreachable,

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Durable store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    /// Snapshot file could not be written.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    // =========================================================================
    // Shape Errors
    // =========================================================================
    /// Payload or record did not have the expected shape.
    #[error("Unexpected payload shape: {0}")]
    Shape(String),

    /// JSON (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A sync cycle ran before a sync function was registered.
    #[error("No sync function registered")]
    NoSyncFunction,

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

/// Maps reqwest failures onto the transport categories.
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SyncError::Timeout(err.url().map(|u| u.to_string()).unwrap_or_default());
        }
        if let Some(status) = err.status() {
            return SyncError::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if err.is_decode() {
            return SyncError::Shape(err.to_string());
        }
        SyncError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}
