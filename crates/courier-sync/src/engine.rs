//! # Sync Engine
//!
//! Root service of the sync layer. Owns one instance of every component,
//! wires them together and runs the background scheduler.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                                     │
//! │                                                                         │
//! │  ┌────────────────────────────────────────────────────────────────┐    │
//! │  │                    scheduler (tokio task)                      │    │
//! │  │  sync tick (SYNC_INTERVAL)    → run_cycle(Scheduled)           │    │
//! │  │  health tick (HEALTH_CHECK)   → probe, cache upkeep, drain     │    │
//! │  │  shutdown channel             → stop                           │    │
//! │  └──────────────┬─────────────────────────────────────────────────┘    │
//! │                 ▼                                                       │
//! │  ┌──────────────────┐    ┌──────────────┐    ┌──────────────────────┐  │
//! │  │ SyncCoordinator  │───►│  Reconciler  │───►│  OrderSource (HTTP)  │  │
//! │  │ gate, notify     │    │  LWW merge   │    └──────────────────────┘  │
//! │  └──────────────────┘    └──────────────┘                              │
//! │                                                                         │
//! │  ┌──────────────────┐    ┌──────────────┐    ┌──────────────────────┐  │
//! │  │ SyncQueue        │    │ SnapshotFile │    │ CachedResource       │  │
//! │  │ outbox drain     │    │ cold start   │    │ auxiliary resources  │  │
//! │  └──────────────────┘    └──────────────┘    └──────────────────────┘  │
//! │                                                                         │
//! │  AFTER A CYCLE:                                                        │
//! │  • completed → write snapshot, record last_sync_at, reset retries      │
//! │  • failed    → record last_sync_error, schedule a backoff retry        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use courier_core::record::stamp_modified;
use courier_core::{EngineStatus, HttpMethod, SyncOutcome, SyncPhase, SyncRecord};
use courier_db::{DbConfig, LocalStore};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::CachedResource;
use crate::config::EngineConfig;
use crate::coordinator::{
    CoordinatorSettings, CycleKind, Subscription, SyncCoordinator, SyncTrigger, TransportEvent,
};
use crate::error::{SyncError, SyncResult};
use crate::health::{HealthCheck, HealthProber};
use crate::http;
use crate::outbox::{DrainReport, HttpOutboxSender, OutboxSender, SyncQueue};
use crate::reconcile::Reconciler;
use crate::snapshot::SnapshotFile;
use crate::source::{HttpOrderSource, OrderSource};

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`SyncEngine`], defaulting every collaborator to its HTTP or
/// SQLite implementation.
pub struct SyncEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<LocalStore>>,
    source: Option<Arc<dyn OrderSource>>,
    health: Option<Arc<dyn HealthCheck>>,
    sender: Option<Arc<dyn OutboxSender>>,
}

impl SyncEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        SyncEngineBuilder {
            config,
            store: None,
            source: None,
            health: None,
            sender: None,
        }
    }

    pub fn with_store(mut self, store: Arc<LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_order_source(mut self, source: impl OrderSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn with_health_check(mut self, health: impl HealthCheck + 'static) -> Self {
        self.health = Some(Arc::new(health));
        self
    }

    pub fn with_outbox_sender(mut self, sender: impl OutboxSender + 'static) -> Self {
        self.sender = Some(Arc::new(sender));
        self
    }

    /// Assembles the engine and seeds the coordinator cache.
    ///
    /// The snapshot file is read before the durable store is opened; the
    /// durable local order set is only consulted when there is no snapshot.
    pub async fn build(self) -> SyncResult<Arc<SyncEngine>> {
        let config = self.config;
        config.validate()?;

        let snapshot = SnapshotFile::new(config.snapshot_path());
        let seed = snapshot.read().await;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(LocalStore::new(DbConfig::new(config.database_path()))),
        };
        let source: Arc<dyn OrderSource> = match self.source {
            Some(source) => source,
            None => Arc::new(HttpOrderSource::new(&config)?),
        };
        let health: Arc<dyn HealthCheck> = match self.health {
            Some(health) => health,
            None => Arc::new(HealthProber::new(&config)?),
        };
        let sender: Arc<dyn OutboxSender> = match self.sender {
            Some(sender) => sender,
            None => Arc::new(HttpOutboxSender::new(&config)?),
        };

        let orders_url = http::resolve(&config.base_url()?, &config.api.orders_path)?;
        let reconciler = Arc::new(Reconciler::new(store.clone(), source, orders_url.as_str()));

        let coordinator = Arc::new(SyncCoordinator::new(
            CoordinatorSettings::from_config(&config),
            health,
        ));
        coordinator.set_sync_source(reconciler.clone());

        match seed {
            Some(seed) => {
                info!(
                    orders = seed.orders.len(),
                    saved_at = %seed.saved_at,
                    "Cache seeded from snapshot"
                );
                coordinator.seed_cache(seed.orders);
            }
            None => {
                let local = reconciler.local_orders().await;
                if !local.is_empty() {
                    info!(orders = local.len(), "Cache seeded from durable order set");
                    coordinator.seed_cache(local);
                }
            }
        }

        let queue = Arc::new(SyncQueue::new(store.clone(), sender, config.sync.max_retries));
        let resources = CachedResource::new(store.clone());
        let retry = Mutex::new(RetryState::new(&config));

        Ok(Arc::new(SyncEngine {
            config,
            store,
            coordinator,
            reconciler,
            queue,
            resources,
            snapshot,
            retry,
        }))
    }
}

// =============================================================================
// Retry State
// =============================================================================

struct RetryState {
    backoff: ExponentialBackoff,
    attempts: u32,
    pending: Option<JoinHandle<()>>,
}

impl RetryState {
    fn new(config: &EngineConfig) -> Self {
        RetryState {
            backoff: ExponentialBackoff {
                initial_interval: config.retry_delay(),
                max_interval: config.sync_interval(),
                multiplier: 2.0,
                max_elapsed_time: None,
                ..Default::default()
            },
            attempts: 0,
            pending: None,
        }
    }

    fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct SyncEngine {
    config: EngineConfig,
    store: Arc<LocalStore>,
    coordinator: Arc<SyncCoordinator>,
    reconciler: Arc<Reconciler>,
    queue: Arc<SyncQueue>,
    resources: CachedResource,
    snapshot: SnapshotFile,
    retry: Mutex<RetryState>,
}

impl SyncEngine {
    pub fn builder(config: EngineConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    fn retry(&self) -> MutexGuard<'_, RetryState> {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the background scheduler. The first sync runs immediately.
    pub fn start(self: &Arc<Self>) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.clone().scheduler(shutdown_rx));

        info!(
            sync_interval_ms = self.config.sync.sync_interval_ms,
            health_check_interval_ms = self.config.sync.health_check_interval_ms,
            "Sync engine started"
        );
        EngineHandle { shutdown_tx, task }
    }

    async fn scheduler(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut sync_tick = tokio::time::interval(self.config.sync_interval());
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let health_interval = self.config.health_check_interval();
        let mut health_tick =
            tokio::time::interval_at(tokio::time::Instant::now() + health_interval, health_interval);
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sync_tick.tick() => {
                    self.clone().run_cycle(SyncTrigger::Scheduled).await;
                }
                _ = health_tick.tick() => {
                    self.health_tick().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Sync engine scheduler shutting down");
                    break;
                }
            }
        }

        self.retry().cancel();
    }

    async fn health_tick(&self) {
        let healthy = self.coordinator.probe().await;
        debug!(healthy, phase = %self.coordinator.phase(), "Health tick");

        self.cache_upkeep().await;

        if self.coordinator.phase() != SyncPhase::Offline {
            match self.queue.pending_count().await {
                Ok(0) => {}
                Ok(_) => {
                    self.drain_logged().await;
                }
                Err(e) => warn!(error = %e, "Failed to count pending outbox entries"),
            }
        }
    }

    async fn cache_upkeep(&self) {
        let Ok(cache) = self.store.cache().await else {
            return;
        };

        match cache.purge_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Expired cache entries purged"),
            Err(e) => warn!(error = %e, "Cache purge failed"),
        }
        match cache.evict_oldest(self.config.cache.max_entries).await {
            Ok(0) => {}
            Ok(evicted) => debug!(evicted, "Oldest cache entries evicted"),
            Err(e) => warn!(error = %e, "Cache eviction failed"),
        }
    }

    // =========================================================================
    // Cycles
    // =========================================================================

    /// Runs one coordinator cycle and records its outcome.
    fn run_cycle(self: Arc<Self>, trigger: SyncTrigger) -> BoxFuture<'static, SyncOutcome> {
        Box::pin(async move {
            let report = self.coordinator.sync_with_report(trigger).await;

            match report.kind {
                CycleKind::Completed => self.after_success(&report.outcome).await,
                CycleKind::Failed => self.after_failure(&report.outcome).await,
                CycleKind::Throttled | CycleKind::InFlight | CycleKind::Offline => {}
            }

            report.outcome
        })
    }

    async fn after_success(&self, outcome: &SyncOutcome) {
        if let Err(e) = self.snapshot.write(&outcome.data).await {
            warn!(error = %e, "Failed to write order snapshot");
        }

        if let Ok(metadata) = self.store.metadata().await {
            if let Err(e) = metadata.record_sync_success(Utc::now()).await {
                warn!(error = %e, "Failed to record sync success");
            }
        }

        let mut retry = self.retry();
        retry.cancel();
        retry.attempts = 0;
        retry.backoff.reset();
    }

    async fn after_failure(self: &Arc<Self>, outcome: &SyncOutcome) {
        let message = outcome.error.as_deref().unwrap_or("sync failed");

        if let Ok(metadata) = self.store.metadata().await {
            if let Err(e) = metadata.record_sync_failure(message, Utc::now()).await {
                warn!(error = %e, "Failed to record sync failure");
            }
        }

        self.schedule_retry();
    }

    /// Schedules a retry cycle with exponential backoff. Retries never fire
    /// inside the minimum sync gap.
    fn schedule_retry(self: &Arc<Self>) {
        let mut retry = self.retry();

        if retry.pending.is_some() {
            return;
        }
        if retry.attempts >= self.config.sync.max_retries {
            warn!(
                attempts = retry.attempts,
                "Retry budget exhausted, waiting for the next scheduled sync"
            );
            return;
        }
        let Some(backoff) = retry.backoff.next_backoff() else {
            return;
        };

        retry.attempts += 1;
        let delay = backoff.max(self.config.min_sync_gap());
        info!(
            attempt = retry.attempts,
            delay_ms = delay.as_millis() as u64,
            "Sync retry scheduled"
        );

        let engine = self.clone();
        retry.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.retry().pending = None;
            engine.run_cycle(SyncTrigger::Retry).await;
        }));
    }

    /// True while a backoff retry is waiting to run.
    pub fn has_pending_retry(&self) -> bool {
        self.retry().pending.is_some()
    }

    /// Immediate cycle honoring only the minimum gap. Supersedes a pending
    /// retry.
    pub async fn force_sync(self: &Arc<Self>) -> SyncOutcome {
        if self.retry().cancel() {
            debug!("Pending retry superseded by forced sync");
        }
        self.clone().run_cycle(SyncTrigger::Forced).await
    }

    // =========================================================================
    // Transport and local changes
    // =========================================================================

    /// Applies a transport event. A reconnect that passes the health probe
    /// runs a sync cycle and drains the outbox.
    pub async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) -> SyncPhase {
        let phase = self.coordinator.handle_transport(event).await;

        if event == TransportEvent::Connected && phase != SyncPhase::Offline {
            self.clone().run_cycle(SyncTrigger::Reconnect).await;
            self.drain_logged().await;
        }

        self.coordinator.phase()
    }

    /// Records an optimistic local edit and queues it for the server.
    ///
    /// The order gets a fresh `updatedAt`, replaces its local copy (DELETE
    /// removes it), subscribers are notified, and the write is enqueued.
    /// The outbox is drained at once unless offline.
    ///
    /// ## Returns
    /// The outbox entry id.
    pub async fn record_local_change(
        &self,
        mut order: Value,
        method: HttpMethod,
        url: impl Into<String>,
    ) -> SyncResult<String> {
        let id = order
            .record_id()
            .ok_or_else(|| SyncError::Shape("local change without an order id".into()))?;

        let orders = if method == HttpMethod::Delete {
            self.reconciler.remove_local(&id).await
        } else {
            stamp_modified(&mut order, Utc::now());
            self.reconciler.upsert_local(order.clone()).await?
        };
        self.coordinator.apply_local(orders);

        let body = (method != HttpMethod::Delete).then_some(order);
        let entry_id = self.queue.enqueue(method, url, body).await?;

        if self.coordinator.phase() != SyncPhase::Offline {
            self.drain_logged().await;
        }

        Ok(entry_id)
    }

    /// Runs one outbox drain pass.
    pub async fn drain_outbox(&self) -> SyncResult<DrainReport> {
        self.queue.drain().await
    }

    async fn drain_logged(&self) {
        if let Err(e) = self.queue.drain().await {
            error!(error = %e, "Outbox drain failed");
        }
    }

    // =========================================================================
    // Read side
    // =========================================================================

    pub fn subscribe(
        &self,
        callback: impl Fn(&SyncOutcome) + Send + Sync + 'static,
    ) -> Subscription {
        self.coordinator.subscribe(callback)
    }

    /// Status snapshot for the dashboard.
    pub async fn status(&self) -> EngineStatus {
        let pending_outbox = self.queue.pending_count().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count pending outbox entries");
            0
        });
        let failed_operations = self.queue.failed_count().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count failed operations");
            0
        });

        EngineStatus {
            phase: self.coordinator.phase(),
            connection: self.coordinator.get_status(),
            pending_outbox,
            failed_operations,
            storage_degraded: self.store.is_degraded(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn resources(&self) -> &CachedResource {
        &self.resources
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Cancels any pending retry and closes the durable store.
    pub async fn close(&self) {
        self.retry().cancel();
        self.store.close().await;
        info!("Sync engine closed");
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to the running scheduler.
pub struct EngineHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Stops the scheduler and waits for it to exit.
    pub async fn shutdown(self) -> SyncResult<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("scheduler task failed: {}", e)))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::OutboxEntry;
    use courier_db::Database;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn test_config(dir: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.storage.snapshot_path = Some(snapshot_path(dir));
        config
    }

    fn snapshot_path(dir: &Path) -> PathBuf {
        dir.join("orders-snapshot.json")
    }

    async fn memory_store() -> Arc<LocalStore> {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Arc::new(LocalStore::from_database(db))
    }

    struct Fakes {
        fetches: Arc<AtomicUsize>,
        sends: Arc<AtomicUsize>,
        fail_fetch: Arc<AtomicBool>,
    }

    async fn engine(dir: &Path, remote: Value) -> (Arc<SyncEngine>, Fakes) {
        let fakes = Fakes {
            fetches: Arc::new(AtomicUsize::new(0)),
            sends: Arc::new(AtomicUsize::new(0)),
            fail_fetch: Arc::new(AtomicBool::new(false)),
        };

        let fetches = fakes.fetches.clone();
        let fail_fetch = fakes.fail_fetch.clone();
        let sends = fakes.sends.clone();

        let engine = SyncEngine::builder(test_config(dir))
            .with_store(memory_store().await)
            .with_health_check(|| async { true })
            .with_order_source(move || {
                fetches.fetch_add(1, Ordering::SeqCst);
                let fail = fail_fetch.load(Ordering::SeqCst);
                let remote = remote.clone();
                async move {
                    if fail {
                        Err(SyncError::Timeout("/api/orders".into()))
                    } else {
                        Ok(remote)
                    }
                }
            })
            .with_outbox_sender(move |_entry: OutboxEntry| {
                sends.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SyncError>(()) }
            })
            .build()
            .await
            .unwrap();

        (engine, fakes)
    }

    #[tokio::test]
    async fn test_successful_sync_writes_snapshot_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, fakes) = engine(dir.path(), json!({"data": [{"id": "1"}]})).await;

        let outcome = engine.force_sync().await;

        assert!(outcome.success);
        assert_eq!(outcome.data, vec![json!({"id": "1"})]);
        assert_eq!(fakes.fetches.load(Ordering::SeqCst), 1);

        let snapshot = SnapshotFile::new(snapshot_path(dir.path())).read().await.unwrap();
        assert_eq!(snapshot.orders, outcome.data);

        let metadata = engine.store().metadata().await.unwrap();
        assert!(metadata.last_sync_at().await.unwrap().is_some());
        assert!(metadata.last_sync_error().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_sync_records_error_and_schedules_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, fakes) = engine(dir.path(), json!([])).await;
        fakes.fail_fetch.store(true, Ordering::SeqCst);

        let outcome = engine.force_sync().await;

        assert!(!outcome.success);
        assert!(engine.has_pending_retry());
        let metadata = engine.store().metadata().await.unwrap();
        assert!(metadata.last_sync_error().await.unwrap().unwrap().contains("timed out"));

        // Throttled by the minimum gap, but still supersedes the retry
        let outcome = engine.force_sync().await;
        assert!(outcome.cached);
        assert!(!engine.has_pending_retry());
        assert_eq!(fakes.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_change_is_applied_and_delivered_online() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, fakes) = engine(dir.path(), json!([])).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.subscribe(move |outcome: &SyncOutcome| sink.lock().unwrap().push(outcome.clone()));

        engine
            .record_local_change(json!({"id": "9", "status": "ready"}), HttpMethod::Put, "/api/orders/9")
            .await
            .unwrap();

        let cached = engine.coordinator().get_cached_data();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0]["status"], "ready");
        assert!(cached[0]["updatedAt"].is_string());
        assert_eq!(seen.lock().unwrap().len(), 1);

        assert_eq!(fakes.sends.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status().await.pending_outbox, 0);
    }

    #[tokio::test]
    async fn test_offline_change_waits_for_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, fakes) = engine(dir.path(), json!([{"id": "1"}])).await;

        engine.handle_transport_event(TransportEvent::Disconnected).await;
        engine
            .record_local_change(json!({"id": "1", "price": 12}), HttpMethod::Patch, "/api/orders/1")
            .await
            .unwrap();

        let status = engine.status().await;
        assert_eq!(status.phase, SyncPhase::Offline);
        assert!(!status.connection.is_online);
        assert_eq!(status.pending_outbox, 1);
        assert_eq!(fakes.sends.load(Ordering::SeqCst), 0);

        let phase = engine.handle_transport_event(TransportEvent::Connected).await;

        assert_eq!(phase, SyncPhase::OnlineIdle);
        assert_eq!(fakes.sends.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status().await.pending_outbox, 0);

        // The newer local edit survives the reconnect sync
        let cached = engine.coordinator().get_cached_data();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0]["price"], 12);
    }

    #[tokio::test]
    async fn test_delete_removes_local_order() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path(), json!([])).await;

        engine
            .record_local_change(json!({"id": "4"}), HttpMethod::Post, "/api/orders")
            .await
            .unwrap();
        engine
            .record_local_change(json!({"id": "4"}), HttpMethod::Delete, "/api/orders/4")
            .await
            .unwrap();

        assert!(engine.coordinator().get_cached_data().is_empty());
        assert!(engine.reconciler().local_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_build_seeds_cache_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        SnapshotFile::new(snapshot_path(dir.path()))
            .write(&[json!({"id": "cold"})])
            .await
            .unwrap();

        let (engine, fakes) = engine(dir.path(), json!([])).await;

        assert!(engine.coordinator().has_cached_data());
        assert_eq!(engine.coordinator().get_cached_data(), vec![json!({"id": "cold"})]);
        assert_eq!(fakes.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scheduler_runs_first_sync_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, fakes) = engine(dir.path(), json!([{"id": "1"}])).await;

        let handle = engine.start();
        for _ in 0..200 {
            if engine.coordinator().has_cached_data() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        handle.shutdown().await.unwrap();
        assert_eq!(fakes.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(engine.coordinator().get_cached_data(), vec![json!({"id": "1"})]);
    }

    #[tokio::test]
    async fn test_status_reports_degraded_storage() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SyncEngine::builder(test_config(dir.path()))
            .with_store(Arc::new(LocalStore::unavailable("disk full")))
            .with_health_check(|| async { true })
            .with_order_source(|| async { Ok::<_, SyncError>(json!([{"id": "1"}])) })
            .with_outbox_sender(|_entry: OutboxEntry| async { Ok::<_, SyncError>(()) })
            .build()
            .await
            .unwrap();

        let outcome = engine.force_sync().await;
        assert!(outcome.success);

        let status = engine.status().await;
        assert!(status.storage_degraded);
        assert_eq!(status.pending_outbox, 0);
    }
}
