//! # Reconciler
//!
//! Wraps the remote [`OrderSource`] so that every fetch yields the remote
//! set merged with the durable local order set (see [`courier_core::merge`]).
//!
//! ```text
//! remote.fetch() ──► coerce ──┐
//!                             ├──► merge (LWW) ──► differs? ──► persist
//! cache["orders:all"] ────────┘                        │
//!                                                      ▼
//!                                               merged array
//! ```
//!
//! The local set survives restarts in the durable store. If the store is
//! unavailable it lives in memory for the session. Read-modify-write cycles
//! on the local set are serialized so concurrent edits are not lost.

use std::sync::{Arc, Mutex, PoisonError};

use courier_core::{merge, CacheEntry, CoreError, SyncRecord, ORDERS_CACHE_KEY};
use courier_db::{DbError, LocalStore};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::coordinator::coerce_records;
use crate::error::SyncResult;
use crate::source::OrderSource;

pub struct Reconciler {
    store: Arc<LocalStore>,
    remote: Arc<dyn OrderSource>,
    orders_url: String,
    /// Mirror of the last written local set.
    memory: Mutex<Option<Vec<Value>>>,
    /// Held from reading the local set until the updated set is persisted.
    writes: tokio::sync::Mutex<()>,
}

impl Reconciler {
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn OrderSource>, orders_url: impl Into<String>) -> Self {
        Reconciler {
            store,
            remote,
            orders_url: orders_url.into(),
            memory: Mutex::new(None),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    /// The local order set: durable copy first, memory mirror otherwise.
    pub async fn local_orders(&self) -> Vec<Value> {
        match self.store.cache().await {
            Ok(cache) => match cache.peek(ORDERS_CACHE_KEY).await {
                Ok(Some(entry)) => return coerce_records(entry.data, "local order set"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to read local order set"),
            },
            Err(e) => debug!(error = %e, "Durable store unavailable, using memory order set"),
        }

        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    /// Fetches the remote set and merges it with the local one.
    ///
    /// The merged set is persisted when it differs from the local set.
    pub async fn fetch_and_merge(&self) -> SyncResult<Value> {
        let payload = self.remote.fetch().await?;
        let remote = coerce_records(payload, "order source");

        let _write = self.writes.lock().await;
        let local = self.local_orders().await;

        let merged = merge(&local, &remote);
        debug!(
            local = local.len(),
            remote = remote.len(),
            local_wins = merged.local_wins,
            remote_wins = merged.remote_wins,
            local_only = merged.local_only,
            remote_only = merged.remote_only,
            dropped_without_id = merged.dropped_without_id,
            "Merged order sets"
        );

        if merged.records != local {
            self.persist(&merged.records).await;
        }

        Ok(Value::Array(merged.records))
    }

    /// Inserts or replaces one order (matched by id) in the local set and
    /// returns the updated set.
    pub async fn upsert_local(&self, order: Value) -> SyncResult<Vec<Value>> {
        let id = order
            .record_id()
            .ok_or_else(|| DbError::from(CoreError::Required("order id".into())))?;

        let _write = self.writes.lock().await;
        let mut orders = self.local_orders().await;
        match orders
            .iter_mut()
            .find(|existing| existing.record_id().as_deref() == Some(id.as_str()))
        {
            Some(existing) => *existing = order,
            None => orders.push(order),
        }

        self.persist(&orders).await;
        info!(id = %id, orders = orders.len(), "Local order updated");
        Ok(orders)
    }

    /// Removes the order with `id` from the local set and returns the
    /// updated set.
    pub async fn remove_local(&self, id: &str) -> Vec<Value> {
        let _write = self.writes.lock().await;
        let mut orders = self.local_orders().await;
        let before = orders.len();
        orders.retain(|order| order.record_id().as_deref() != Some(id));

        if orders.len() != before {
            self.persist(&orders).await;
            info!(id, orders = orders.len(), "Local order removed");
        }
        orders
    }

    async fn persist(&self, orders: &[Value]) {
        *self.memory.lock().unwrap_or_else(PoisonError::into_inner) = Some(orders.to_vec());

        let entry = CacheEntry::new(
            ORDERS_CACHE_KEY,
            self.orders_url.as_str(),
            Value::Array(orders.to_vec()),
            None,
        );
        let result = match self.store.cache().await {
            Ok(cache) => cache.put(&entry).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => debug!(orders = orders.len(), "Local order set persisted"),
            Err(e) if e.is_unavailable() => {
                debug!(error = %e, "Local order set kept in memory only")
            }
            Err(e) => warn!(error = %e, "Failed to persist local order set"),
        }
    }
}

impl OrderSource for Reconciler {
    fn fetch(&self) -> BoxFuture<'_, SyncResult<Value>> {
        Box::pin(self.fetch_and_merge())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use courier_db::{Database, DbConfig};
    use serde_json::json;

    async fn durable_store() -> Arc<LocalStore> {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Arc::new(LocalStore::from_database(db))
    }

    fn fixed_remote(payload: Value) -> Arc<dyn OrderSource> {
        Arc::new(move || {
            let payload = payload.clone();
            async move { Ok::<_, SyncError>(payload) }
        })
    }

    #[tokio::test]
    async fn test_newer_local_edit_survives_fetch() {
        let store = durable_store().await;
        let reconciler = Reconciler::new(
            store.clone(),
            fixed_remote(json!({"orders": [
                {"id": "1", "updatedAt": "2024-05-01T09:00:00Z", "status": "new"},
                {"id": "2", "updatedAt": "2024-05-01T09:00:00Z", "status": "new"}
            ]})),
            "/api/orders",
        );

        reconciler
            .upsert_local(json!({"id": "1", "updatedAt": "2024-05-01T10:00:00Z", "status": "ready"}))
            .await
            .unwrap();

        let merged = reconciler.fetch_and_merge().await.unwrap();
        let merged = merged.as_array().unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0]["status"], "ready");
        assert_eq!(merged[1]["id"], "2");

        // Merged set was written back
        let stored = store.cache().await.unwrap().peek(ORDERS_CACHE_KEY).await.unwrap().unwrap();
        assert_eq!(stored.data.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_set_is_not_rewritten() {
        let store = durable_store().await;
        let orders = json!([{"id": "1", "updatedAt": "2024-05-01T09:00:00Z"}]);
        let reconciler = Reconciler::new(store.clone(), fixed_remote(orders.clone()), "/api/orders");

        reconciler.fetch_and_merge().await.unwrap();
        reconciler.fetch_and_merge().await.unwrap();

        let stored = store.cache().await.unwrap().peek(ORDERS_CACHE_KEY).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.data, orders);
    }

    #[tokio::test]
    async fn test_memory_order_set_when_store_unavailable() {
        let reconciler = Reconciler::new(
            Arc::new(LocalStore::unavailable("read-only filesystem")),
            fixed_remote(json!([])),
            "/api/orders",
        );

        reconciler.upsert_local(json!({"id": 7, "status": "draft"})).await.unwrap();
        let merged = reconciler.fetch_and_merge().await.unwrap();

        assert_eq!(merged, json!([{"id": 7, "status": "draft"}]));
    }

    #[tokio::test]
    async fn test_upsert_requires_id() {
        let reconciler = Reconciler::new(durable_store().await, fixed_remote(json!([])), "/api/orders");

        let err = reconciler.upsert_local(json!({"status": "draft"})).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(DbError::Invalid(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_every_order() {
        let store = durable_store().await;
        let reconciler = Arc::new(Reconciler::new(store.clone(), fixed_remote(json!([])), "/api/orders"));

        let tasks: Vec<_> = (0..20)
            .map(|n| {
                let reconciler = reconciler.clone();
                tokio::spawn(async move {
                    reconciler
                        .upsert_local(json!({"id": n, "status": "draft"}))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut ids: Vec<i64> = reconciler
            .local_orders()
            .await
            .iter()
            .filter_map(|order| order["id"].as_i64())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());

        let removed = reconciler.remove_local("3").await;
        assert_eq!(removed.len(), 19);
    }
}
