//! # Local Store
//!
//! Lazily-opened, shared handle to the durable store.
//!
//! ## Initialization
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   caller A ──┐                                                          │
//! │   caller B ──┼──► init() ──► OnceCell ──► Database::new (runs once)    │
//! │   caller C ──┘                 │                                        │
//! │                                ├── Ok(db)   every caller gets &db       │
//! │                                └── Err(msg) every caller gets           │
//! │                                             DbError::Unavailable(msg)   │
//! │                                                                         │
//! │   The outcome is fixed for the life of the store: a store that failed  │
//! │   to open stays unavailable and callers run memory-only.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tokio::sync::OnceCell;
use tracing::error;

use crate::error::{DbError, DbResult};
use crate::pool::{Database, DbConfig};
use crate::repository::cache::CacheRepository;
use crate::repository::metadata::MetadataRepository;
use crate::repository::outbox::OutboxRepository;

/// Shared, lazily initialized durable store.
#[derive(Debug)]
pub struct LocalStore {
    config: DbConfig,
    db: OnceCell<Result<Database, String>>,
}

impl LocalStore {
    /// Creates a store that opens `config` on first use.
    pub fn new(config: DbConfig) -> Self {
        LocalStore {
            config,
            db: OnceCell::new(),
        }
    }

    /// Wraps an already opened database.
    pub fn from_database(db: Database) -> Self {
        LocalStore {
            config: DbConfig::in_memory(),
            db: OnceCell::new_with(Some(Ok(db))),
        }
    }

    /// Creates a store that is permanently unavailable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        LocalStore {
            config: DbConfig::in_memory(),
            db: OnceCell::new_with(Some(Err(reason.into()))),
        }
    }

    /// Opens the store. Idempotent and safe under concurrent callers: the
    /// database is opened exactly once.
    pub async fn init(&self) -> DbResult<&Database> {
        let outcome = self
            .db
            .get_or_init(|| async {
                Database::new(self.config.clone()).await.map_err(|e| {
                    error!(
                        error = %e,
                        path = %self.config.database_path.display(),
                        "Durable store unavailable, continuing memory-only"
                    );
                    e.to_string()
                })
            })
            .await;

        outcome
            .as_ref()
            .map_err(|reason| DbError::Unavailable(reason.clone()))
    }

    /// Returns the opened database without triggering initialization.
    pub fn get(&self) -> Option<&Database> {
        self.db.get().and_then(|outcome| outcome.as_ref().ok())
    }

    /// True once initialization has been attempted and failed.
    pub fn is_degraded(&self) -> bool {
        matches!(self.db.get(), Some(Err(_)))
    }

    /// Cache repository (initializes the store on first use).
    pub async fn cache(&self) -> DbResult<CacheRepository> {
        Ok(self.init().await?.cache())
    }

    /// Outbox repository (initializes the store on first use).
    pub async fn outbox(&self) -> DbResult<OutboxRepository> {
        Ok(self.init().await?.outbox())
    }

    /// Metadata repository (initializes the store on first use).
    pub async fn metadata(&self) -> DbResult<MetadataRepository> {
        Ok(self.init().await?.metadata())
    }

    /// Closes the pool if it was opened.
    pub async fn close(&self) {
        if let Some(db) = self.get() {
            db.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_init_opens_once() {
        let store = Arc::new(LocalStore::new(DbConfig::in_memory()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.init().await.map(|db| db.pool().size()) })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // Same pool: data written through one handle is visible through another
        let cache = store.cache().await.unwrap();
        cache
            .put(&courier_core::CacheEntry::new("k", "/k", serde_json::json!(1), None))
            .await
            .unwrap();
        assert_eq!(store.cache().await.unwrap().count().await.unwrap(), 1);
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = LocalStore::unavailable("read-only volume");

        assert!(store.is_degraded());
        assert!(store.get().is_none());
        assert!(matches!(store.cache().await, Err(DbError::Unavailable(_))));
        assert!(matches!(store.outbox().await, Err(DbError::Unavailable(_))));
        assert!(matches!(store.metadata().await, Err(DbError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unopenable_path_degrades() {
        // A path under a regular file can never be created
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let store = LocalStore::new(DbConfig::new(blocker.join("sub").join("courier.db")));
        assert!(store.init().await.is_err());
        assert!(store.is_degraded());
    }
}
