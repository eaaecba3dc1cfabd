//! # courier-core: Pure Logic for the Courier Sync Engine
//!
//! This crate holds everything in the sync engine that can be expressed
//! without I/O: the persisted entry types, the connection status model,
//! payload normalization and the last-writer-wins merge.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Courier Sync Engine Layers                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                Dashboard (order board, print, ...)              │   │
//! │  │      reads orders + status, pushes status/price edits          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 courier-sync (engine services)                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ courier-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌───────────┐  ┌──────────┐  │   │
//! │  │   │   types   │  │  normalize  │  │   merge   │  │  record  │  │   │
//! │  │   │CacheEntry │  │ array/obj → │  │ LWW by    │  │ id + ts  │  │   │
//! │  │   │OutboxEntry│  │ Vec<Value>  │  │ timestamp │  │ lookup   │  │   │
//! │  │   └───────────┘  └─────────────┘  └───────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Cache/outbox entries, connection status, sync outcomes
//! - [`record`] - Id and last-modified extraction from opaque orders
//! - [`normalize`] - Coercion of upstream payloads into a record array
//! - [`merge`] - Last-writer-wins reconciliation of local and remote sets
//! - [`error`] - Domain error types
//!
//! ## Example
//!
//! ```rust
//! use courier_core::merge::merge;
//! use serde_json::json;
//!
//! let local = vec![json!({"id": "1", "updatedAt": "2024-05-01T10:00:00Z", "status": "ready"})];
//! let remote = vec![json!({"id": "1", "updatedAt": "2024-05-01T09:00:00Z", "status": "new"})];
//!
//! let merged = merge(&local, &remote);
//! assert_eq!(merged.records[0]["status"], "ready");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod merge;
pub mod normalize;
pub mod record;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::CoreError;
pub use merge::{merge, MergeOutcome};
pub use normalize::{normalize_payload, Coercion, NormalizedPayload, CONTAINER_KEYS};
pub use record::SyncRecord;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Schema version written into the flat order snapshot.
///
/// Bump when the snapshot layout changes; readers discard snapshots with a
/// different version instead of guessing.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Cache key under which the durable local order set is stored.
pub const ORDERS_CACHE_KEY: &str = "orders:all";
