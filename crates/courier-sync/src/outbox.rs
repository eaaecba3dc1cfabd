//! # Sync Queue (Outbox)
//!
//! Durable queue of writes made while offline or optimistically, replayed
//! against the order service with a bounded retry budget.
//!
//! ## Drain Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  sync_outbox (ORDER BY seq)                                            │
//! │  ┌────┬────────┬──────────────┬─────────────┐                          │
//! │  │ 1  │ PUT    │ /orders/7    │ retry 2/3   │──► send ── ok ──► DELETE │
//! │  │ 2  │ POST   │ /orders      │ retry 0/3   │      │                   │
//! │  │ 3  │ PATCH  │ /orders/9    │ retry 0/3   │      └─ err ─► retry+1   │
//! │  └────┴────────┴──────────────┴─────────────┘               │          │
//! │                                                   retry == max?        │
//! │                                                    │yes       │no      │
//! │                                                    ▼          ▼        │
//! │                                   DELETE + failed_op:<id>   UPDATE     │
//! │                                   (one transaction)        + error     │
//! │                                                                         │
//! │  Every entry is attempted once per pass; a failure never blocks the    │
//! │  entries behind it. Overlapping drain calls collapse into one pass.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! When the durable store is unavailable the queue keeps working from
//! memory for the rest of the session.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use courier_core::{FailedOperation, HttpMethod, OutboxEntry};
use courier_db::{DbError, LocalStore, OutboxRepository};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::SyncResult;
use crate::http;

// =============================================================================
// Sender
// =============================================================================

/// Delivers one queued write to the remote service.
pub trait OutboxSender: Send + Sync {
    fn send(&self, entry: OutboxEntry) -> BoxFuture<'_, SyncResult<()>>;
}

impl<F, Fut> OutboxSender for F
where
    F: Fn(OutboxEntry) -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    fn send(&self, entry: OutboxEntry) -> BoxFuture<'_, SyncResult<()>> {
        Box::pin(self(entry))
    }
}

/// Replays entries over HTTP: `method url` with the JSON body, if any.
#[derive(Debug, Clone)]
pub struct HttpOutboxSender {
    client: reqwest::Client,
    base: Url,
}

impl HttpOutboxSender {
    pub fn new(config: &EngineConfig) -> SyncResult<Self> {
        Self::with_base(config.base_url()?, config.request_timeout())
    }

    pub fn with_base(base: Url, timeout: Duration) -> SyncResult<Self> {
        Ok(HttpOutboxSender {
            client: http::client(timeout)?,
            base,
        })
    }

    async fn deliver(&self, entry: OutboxEntry) -> SyncResult<()> {
        let url = http::resolve(&self.base, &entry.url)?;
        debug!(id = %entry.id, method = %entry.method, url = %url, "Replaying outbox entry");

        let mut request = self.client.request(http::method(entry.method), url);
        if let Some(body) = &entry.data {
            request = request.json(body);
        }

        http::ensure_success(request.send().await?)?;
        Ok(())
    }
}

impl OutboxSender for HttpOutboxSender {
    fn send(&self, entry: OutboxEntry) -> BoxFuture<'_, SyncResult<()>> {
        Box::pin(self.deliver(entry))
    }
}

// =============================================================================
// Drain Report
// =============================================================================

/// Counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dropped: usize,
    /// Entries whose queue bookkeeping could not be written. They stay
    /// pending in their previous state.
    pub store_errors: usize,
    /// True if another pass was already running and this call did nothing.
    pub in_flight: bool,
}

// =============================================================================
// Sync Queue
// =============================================================================

#[derive(Default)]
struct MemoryQueue {
    pending: VecDeque<OutboxEntry>,
    failed: Vec<FailedOperation>,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Outbox over the durable store, with a memory-only fallback.
pub struct SyncQueue {
    store: Arc<LocalStore>,
    sender: Arc<dyn OutboxSender>,
    max_retries: i64,
    draining: AtomicBool,
    memory: Mutex<MemoryQueue>,
}

impl SyncQueue {
    pub fn new(store: Arc<LocalStore>, sender: Arc<dyn OutboxSender>, max_retries: u32) -> Self {
        SyncQueue {
            store,
            sender,
            max_retries: i64::from(max_retries.max(1)),
            draining: AtomicBool::new(false),
            memory: Mutex::new(MemoryQueue::default()),
        }
    }

    fn memory(&self) -> MutexGuard<'_, MemoryQueue> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn durable(&self) -> Option<OutboxRepository> {
        self.store.outbox().await.ok()
    }

    /// Appends a write to the queue and returns its id.
    pub async fn enqueue(
        &self,
        method: HttpMethod,
        url: impl Into<String>,
        data: Option<Value>,
    ) -> SyncResult<String> {
        let entry = OutboxEntry::new(method, url, data, self.max_retries);
        entry.validate().map_err(DbError::from)?;

        if let Some(outbox) = self.durable().await {
            match outbox.put(&entry).await {
                Ok(()) => {
                    debug!(id = %entry.id, method = %entry.method, url = %entry.url, "Outbox entry enqueued");
                    return Ok(entry.id);
                }
                Err(e) if e.is_unavailable() => {
                    warn!(error = %e, "Outbox write failed, queueing in memory");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let id = entry.id.clone();
        debug!(id = %id, method = %entry.method, url = %entry.url, "Outbox entry queued in memory");
        self.memory().pending.push_back(entry);
        Ok(id)
    }

    /// Pending entries in enqueue order.
    pub async fn list_sync_queue(&self) -> SyncResult<Vec<OutboxEntry>> {
        let mut entries = match self.durable().await {
            Some(outbox) => outbox.get_all().await?,
            None => Vec::new(),
        };
        entries.extend(self.memory().pending.iter().cloned());
        Ok(entries)
    }

    pub async fn pending_count(&self) -> SyncResult<i64> {
        let durable = match self.durable().await {
            Some(outbox) => outbox.count().await?,
            None => 0,
        };
        Ok(durable + self.memory().pending.len() as i64)
    }

    /// True while a drain pass is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Attempts every pending entry once, in order.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("Outbox drain already in flight");
            return Ok(DrainReport {
                in_flight: true,
                ..DrainReport::default()
            });
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();

        let durable = self.durable().await;
        if let Some(outbox) = &durable {
            for entry in outbox.get_all().await? {
                self.attempt(entry, Some(outbox), &mut report).await;
            }
        }

        let in_memory: Vec<OutboxEntry> = self.memory().pending.iter().cloned().collect();
        for entry in in_memory {
            self.attempt(entry, None, &mut report).await;
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                retried = report.retried,
                dropped = report.dropped,
                store_errors = report.store_errors,
                "Outbox drain finished"
            );
        }
        Ok(report)
    }

    /// Sends one entry and records the result. Storage errors are logged and
    /// counted so the remaining entries still get their attempt.
    async fn attempt(
        &self,
        mut entry: OutboxEntry,
        outbox: Option<&OutboxRepository>,
        report: &mut DrainReport,
    ) {
        report.attempted += 1;

        let error = match self.sender.send(entry.clone()).await {
            Ok(()) => {
                debug!(id = %entry.id, "Outbox entry delivered");
                report.delivered += 1;
                match outbox {
                    Some(outbox) => {
                        if let Err(e) = outbox.delete(&entry.id).await {
                            warn!(id = %entry.id, error = %e, "Delivered outbox entry could not be removed");
                            report.store_errors += 1;
                        }
                    }
                    None => {
                        self.memory().pending.retain(|e| e.id != entry.id);
                    }
                }
                return;
            }
            Err(e) => e.to_string(),
        };

        if entry.record_failure() {
            warn!(
                id = %entry.id,
                method = %entry.method,
                url = %entry.url,
                retry_count = entry.retry_count,
                error = %error,
                "Outbox entry failed permanently, dropped from queue"
            );

            let failed = FailedOperation {
                entry,
                error,
                failed_at: Utc::now(),
            };
            match outbox {
                Some(outbox) => {
                    if let Err(e) = outbox.record_permanent_failure(&failed).await {
                        warn!(id = %failed.entry.id, error = %e, "Failed outbox entry could not be moved aside");
                        report.store_errors += 1;
                        return;
                    }
                }
                None => {
                    let mut memory = self.memory();
                    memory.pending.retain(|e| e.id != failed.entry.id);
                    memory.failed.push(failed);
                }
            }
            report.dropped += 1;
        } else {
            debug!(
                id = %entry.id,
                retry_count = entry.retry_count,
                max_retries = entry.max_retries,
                error = %error,
                "Outbox delivery failed, will retry"
            );

            match outbox {
                Some(outbox) => {
                    if let Err(e) = outbox.record_retry(&entry, &error).await {
                        warn!(id = %entry.id, error = %e, "Outbox retry count could not be saved");
                        report.store_errors += 1;
                        return;
                    }
                }
                None => {
                    let mut memory = self.memory();
                    if let Some(slot) = memory.pending.iter_mut().find(|e| e.id == entry.id) {
                        *slot = entry;
                    }
                }
            }
            report.retried += 1;
        }
    }

    // =========================================================================
    // Failed operations
    // =========================================================================

    /// Entries dropped after exhausting their retries.
    pub async fn list_failed(&self) -> SyncResult<Vec<FailedOperation>> {
        let mut failed = match self.store.metadata().await {
            Ok(metadata) => metadata.failed_operations().await?,
            Err(_) => Vec::new(),
        };
        failed.extend(self.memory().failed.iter().cloned());
        Ok(failed)
    }

    pub async fn failed_count(&self) -> SyncResult<i64> {
        let durable = match self.store.metadata().await {
            Ok(metadata) => metadata.count_failed_operations().await?,
            Err(_) => 0,
        };
        Ok(durable + self.memory().failed.len() as i64)
    }

    /// Puts a failed operation back at the end of the queue with a fresh
    /// retry budget. Returns false if no failed operation has that id.
    pub async fn retry_failed(&self, id: &str) -> SyncResult<bool> {
        if let Some(outbox) = self.durable().await {
            if outbox.requeue_failed(id).await?.is_some() {
                return Ok(true);
            }
        }

        let mut memory = self.memory();
        let Some(index) = memory.failed.iter().position(|f| f.entry.id == id) else {
            return Ok(false);
        };
        let failed = memory.failed.remove(index);
        memory.pending.push_back(OutboxEntry {
            retry_count: 0,
            timestamp: Utc::now(),
            ..failed.entry
        });
        info!(id, "Failed operation re-enqueued in memory");
        Ok(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use courier_db::{Database, DbConfig};
    use serde_json::json;
    use std::collections::HashMap;

    async fn durable_store() -> Arc<LocalStore> {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Arc::new(LocalStore::from_database(db))
    }

    /// Sender that fails for urls in `failing` and records every attempt.
    fn recording_sender(
        failing: &'static [&'static str],
        attempts: Arc<Mutex<HashMap<String, usize>>>,
    ) -> Arc<dyn OutboxSender> {
        Arc::new(move |entry: OutboxEntry| {
            *attempts.lock().unwrap().entry(entry.url.clone()).or_default() += 1;
            let fail = failing.contains(&entry.url.as_str());
            async move {
                if fail {
                    Err(SyncError::HttpStatus {
                        status: 503,
                        url: entry.url,
                    })
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test]
    async fn test_failing_entry_does_not_block_others() {
        let attempts = Arc::new(Mutex::new(HashMap::new()));
        let queue = SyncQueue::new(
            durable_store().await,
            recording_sender(&["/orders/1"], attempts.clone()),
            3,
        );

        let first = queue.enqueue(HttpMethod::Put, "/orders/1", Some(json!({"status": "ready"}))).await.unwrap();
        queue.enqueue(HttpMethod::Put, "/orders/2", None).await.unwrap();
        queue.enqueue(HttpMethod::Delete, "/orders/3", None).await.unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.retried, 1);

        let pending = queue.list_sync_queue().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].retry_count, 1);

        queue.drain().await.unwrap();
        let report = queue.drain().await.unwrap();
        assert_eq!(report.dropped, 1);

        assert!(queue.list_sync_queue().await.unwrap().is_empty());
        assert_eq!(attempts.lock().unwrap()["/orders/1"], 3);
        assert_eq!(attempts.lock().unwrap()["/orders/2"], 1);

        let failed = queue.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].entry.id, first);
        assert!(failed[0].error.contains("503"));
    }

    #[tokio::test]
    async fn test_successful_drain_empties_queue() {
        let attempts = Arc::new(Mutex::new(HashMap::new()));
        let queue = SyncQueue::new(durable_store().await, recording_sender(&[], attempts.clone()), 3);

        for n in 0..5 {
            queue
                .enqueue(HttpMethod::Post, format!("/orders/{}", n), Some(json!({"n": n})))
                .await
                .unwrap();
        }
        assert_eq!(queue.pending_count().await.unwrap(), 5);

        let report = queue.drain().await.unwrap();

        assert_eq!(report.delivered, 5);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert!(attempts.lock().unwrap().values().all(|n| *n == 1));
    }

    #[tokio::test]
    async fn test_overlapping_drains_collapse() {
        let release = Arc::new(tokio::sync::Notify::new());
        let sends = Arc::new(Mutex::new(0usize));
        let sender: Arc<dyn OutboxSender> = {
            let release = release.clone();
            let sends = sends.clone();
            Arc::new(move |_entry: OutboxEntry| {
                *sends.lock().unwrap() += 1;
                let release = release.clone();
                async move {
                    release.notified().await;
                    Ok::<_, SyncError>(())
                }
            })
        };
        let queue = Arc::new(SyncQueue::new(durable_store().await, sender, 3));
        queue.enqueue(HttpMethod::Put, "/orders/1", None).await.unwrap();

        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await })
        };
        while *sends.lock().unwrap() == 0 {
            tokio::task::yield_now().await;
        }

        let second = queue.drain().await.unwrap();
        assert!(second.in_flight);
        assert_eq!(second.attempted, 0);

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.delivered, 1);
        assert!(!queue.is_draining());
        assert_eq!(*sends.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_only_when_store_unavailable() {
        let attempts = Arc::new(Mutex::new(HashMap::new()));
        let queue = SyncQueue::new(
            Arc::new(LocalStore::unavailable("disk full")),
            recording_sender(&["/orders/bad"], attempts),
            1,
        );

        queue.enqueue(HttpMethod::Put, "/orders/bad", None).await.unwrap();
        queue.enqueue(HttpMethod::Put, "/orders/good", None).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 2);

        let report = queue.drain().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(queue.failed_count().await.unwrap(), 1);

        let failed = queue.list_failed().await.unwrap();
        assert!(queue.retry_failed(&failed[0].entry.id).await.unwrap());

        let pending = queue.list_sync_queue().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 0);
        assert_eq!(queue.failed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_failed_requeues_durable_entry() {
        let attempts = Arc::new(Mutex::new(HashMap::new()));
        let queue = SyncQueue::new(
            durable_store().await,
            recording_sender(&["/orders/1"], attempts),
            1,
        );

        let id = queue.enqueue(HttpMethod::Patch, "/orders/1", Some(json!({"price": 12}))).await.unwrap();
        queue.drain().await.unwrap();
        assert_eq!(queue.failed_count().await.unwrap(), 1);

        assert!(queue.retry_failed(&id).await.unwrap());
        assert!(!queue.retry_failed("missing").await.unwrap());

        let pending = queue.list_sync_queue().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].data, Some(json!({"price": 12})));
        assert_eq!(queue.failed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_blank_url() {
        let attempts = Arc::new(Mutex::new(HashMap::new()));
        let queue = SyncQueue::new(durable_store().await, recording_sender(&[], attempts), 3);

        let err = queue.enqueue(HttpMethod::Post, "  ", None).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(DbError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_store_error_on_one_entry_does_not_abort_drain() {
        let store = durable_store().await;
        sqlx::query(
            "CREATE TRIGGER keep_second_order BEFORE DELETE ON sync_outbox \
             WHEN OLD.url = '/orders/2' BEGIN SELECT RAISE(ABORT, 'row locked'); END",
        )
        .execute(store.get().unwrap().pool())
        .await
        .unwrap();

        let attempts = Arc::new(Mutex::new(HashMap::new()));
        let queue = SyncQueue::new(store, recording_sender(&[], attempts.clone()), 3);
        for n in 1..=3 {
            queue.enqueue(HttpMethod::Put, format!("/orders/{}", n), None).await.unwrap();
        }

        let report = queue.drain().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.store_errors, 1);
        assert_eq!(attempts.lock().unwrap().len(), 3);

        let pending = queue.list_sync_queue().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "/orders/2");
    }
}
