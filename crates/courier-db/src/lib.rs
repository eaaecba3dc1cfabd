//! # courier-db: Durable Store for the Courier Sync Engine
//!
//! This crate provides the engine's durable storage: cached payloads, the
//! outbox of pending writes, and sync metadata, all in one SQLite database
//! accessed through sqlx.
//!
//! ## Layout
//! ```text
//! courier-sync ──► LocalStore ──(first use)──► Database::new ──► migrations
//!                      │
//!                      ├── cache()     cache_entries       keyed payloads + TTL
//!                      ├── outbox()    sync_outbox         pending writes, FIFO
//!                      └── metadata()  metadata            last sync, failed ops
//!
//! file: <data dir>/courier.db  (WAL)        tests: in-memory, one connection
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - Lazy, shared store initialization
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Cache, outbox and metadata repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_db::{DbConfig, LocalStore};
//!
//! let store = LocalStore::new(DbConfig::new("path/to/courier.db"));
//!
//! // First use opens the database and runs migrations
//! let cache = store.cache().await?;
//! let orders = cache.get("orders:all").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use store::LocalStore;

pub use repository::cache::CacheRepository;
pub use repository::metadata::{MetadataEntry, MetadataRepository};
pub use repository::outbox::OutboxRepository;
