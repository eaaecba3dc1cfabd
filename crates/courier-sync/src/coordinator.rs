//! # Sync Coordinator
//!
//! Orchestrates fetch cycles: rate limiting, in-flight de-duplication,
//! subscriber notification and cached fallback on failure. It is the only
//! writer of the in-memory "last good data" and of [`ConnectionStatus`].
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │              transport Connected + probe ok                            │
//! │   ┌─────────┐ ─────────────────────────────► ┌──────────────┐          │
//! │   │ OFFLINE │                                │ ONLINE_IDLE  │◄──┐      │
//! │   └─────────┘ ◄───────────────────────────── └──────┬───────┘   │      │
//! │        ▲           transport Disconnected           │           │      │
//! │        │                                   trigger  │ (gated)   │ done │
//! │        │                                            ▼           │      │
//! │        │         transport Disconnected     ┌──────────────┐    │      │
//! │        └─────────────────────────────────── │   SYNCING    │────┘      │
//! │                                             └──────────────┘           │
//! │                                                                         │
//! │  ONLINE_ERROR is ONLINE_IDLE with connection.last_error set.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fetch Cycle
//! ```text
//! 1. cycle already running           → cache, cached=true   (no network)
//!    within min gap of last attempt  → cache, cached=true   (no network)
//!    offline                         → cache, success=false (no network)
//! 2. probe health; unhealthy         → failures+1, cache, success=false
//! 3. call the sync function
//! 4. coerce the payload into an array
//! 5. ok   → replace cache, failures=0, stamp last sync, notify fresh
//! 6. err  → failures+1, keep cache, notify success=false cached=true
//! ```
//!
//! The minimum gap applies to every trigger, forced ones included, so two
//! `force_sync` calls inside the gap make exactly one network call and
//! return the same data.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use courier_core::{normalize_payload, ConnectionStatus, SyncOutcome, SyncPhase};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::health::HealthCheck;
use crate::source::OrderSource;

// =============================================================================
// Triggers and Events
// =============================================================================

/// What started a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Background polling tick.
    Scheduled,
    /// Explicit `force_sync` call.
    Forced,
    /// Transport came back.
    Reconnect,
    /// Scheduled retry after a failed cycle.
    Retry,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTrigger::Scheduled => write!(f, "scheduled"),
            SyncTrigger::Forced => write!(f, "forced"),
            SyncTrigger::Reconnect => write!(f, "reconnect"),
            SyncTrigger::Retry => write!(f, "retry"),
        }
    }
}

/// Transport-level connectivity change reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// The sync function ran and succeeded.
    Completed,
    /// Health probe or sync function failed.
    Failed,
    /// Skipped: inside the minimum gap.
    Throttled,
    /// Skipped: another cycle is running.
    InFlight,
    /// Skipped: transport is down.
    Offline,
}

impl CycleKind {
    /// True if this cycle touched the network.
    pub fn ran(&self) -> bool {
        matches!(self, CycleKind::Completed | CycleKind::Failed)
    }
}

/// Outcome of a cycle plus how it ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub outcome: SyncOutcome,
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Minimum time between two sync attempts.
    pub min_sync_gap: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        CoordinatorSettings {
            min_sync_gap: config.min_sync_gap(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            min_sync_gap: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Subscribers
// =============================================================================

type Subscriber = Arc<dyn Fn(&SyncOutcome) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Subscriber)>,
}

/// Handle returned by [`SyncCoordinator::subscribe`].
///
/// Dropping the handle keeps the subscription; call
/// [`Subscription::unsubscribe`] to stop notifications.
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the subscriber. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return false;
        };
        let mut subscribers = lock(&subscribers);
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(id, _)| *id != self.id);
        subscribers.entries.len() != before
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

fn deliver(id: u64, callback: &Subscriber, outcome: &SyncOutcome) {
    if catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
        error!(subscriber = id, "Subscriber panicked, continuing with the rest");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Payload coercion
// =============================================================================

/// Normalizes a payload into records, logging any coercion.
pub(crate) fn coerce_records(payload: Value, origin: &str) -> Vec<Value> {
    let normalized = normalize_payload(payload);
    match &normalized.coercion {
        Some(coercion) if coercion.is_fallback() => {
            warn!(origin, %coercion, "Payload is not a record list");
        }
        Some(coercion) => debug!(origin, %coercion, "Payload coerced"),
        None => {}
    }
    normalized.records
}

// =============================================================================
// Coordinator
// =============================================================================

struct State {
    phase: SyncPhase,
    connection: ConnectionStatus,
    /// `None` until the first successful cycle (or a seed).
    cache: Option<Vec<Value>>,
    last_attempt: Option<Instant>,
}

impl State {
    fn cached(&self) -> Vec<Value> {
        self.cache.clone().unwrap_or_default()
    }
}

/// Process-wide sync orchestrator. Construct one per engine.
pub struct SyncCoordinator {
    settings: CoordinatorSettings,
    health: Arc<dyn HealthCheck>,
    source: RwLock<Option<Arc<dyn OrderSource>>>,
    state: Mutex<State>,
    subscribers: Arc<Mutex<Subscribers>>,
    cycle: tokio::sync::Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(settings: CoordinatorSettings, health: Arc<dyn HealthCheck>) -> Self {
        SyncCoordinator {
            settings,
            health,
            source: RwLock::new(None),
            state: Mutex::new(State {
                phase: SyncPhase::default(),
                connection: ConnectionStatus::default(),
                cache: None,
                last_attempt: None,
            }),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers the single fetch function, replacing any previous one.
    pub fn set_sync_function(&self, source: impl OrderSource + 'static) {
        self.set_sync_source(Arc::new(source));
    }

    pub fn set_sync_source(&self, source: Arc<dyn OrderSource>) {
        *self.source.write().unwrap_or_else(PoisonError::into_inner) = Some(source);
    }

    /// Subscribes to completed cycles.
    ///
    /// The callback runs once immediately with the current cache (if any),
    /// then after every completed cycle, in subscription order. A panicking
    /// callback does not prevent the others from running.
    pub fn subscribe(&self, callback: impl Fn(&SyncOutcome) + Send + Sync + 'static) -> Subscription {
        let callback: Subscriber = Arc::new(callback);

        let id = {
            let mut subscribers = lock(&self.subscribers);
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.entries.push((id, callback.clone()));
            id
        };

        let current = lock(&self.state).cache.clone();
        if let Some(data) = current {
            deliver(id, &callback, &SyncOutcome::cached(data));
        }

        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Runs an immediate cycle, honoring only the minimum gap.
    pub async fn force_sync(&self) -> SyncOutcome {
        self.sync(SyncTrigger::Forced).await
    }

    pub async fn sync(&self, trigger: SyncTrigger) -> SyncOutcome {
        self.sync_with_report(trigger).await.outcome
    }

    /// Runs one fetch cycle and reports how it ended.
    pub async fn sync_with_report(&self, trigger: SyncTrigger) -> CycleReport {
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!(%trigger, "Sync already in flight, serving cache");
            return self.skipped(CycleKind::InFlight);
        };

        {
            let mut state = lock(&self.state);

            if state.phase == SyncPhase::Offline {
                debug!(%trigger, "Offline, serving cache without a network call");
                return CycleReport {
                    kind: CycleKind::Offline,
                    outcome: SyncOutcome::failed(state.cached(), "offline"),
                };
            }

            let now = Instant::now();
            if let Some(last) = state.last_attempt {
                let elapsed = now.duration_since(last);
                if elapsed < self.settings.min_sync_gap {
                    debug!(
                        %trigger,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Within minimum sync gap, serving cache"
                    );
                    return CycleReport {
                        kind: CycleKind::Throttled,
                        outcome: SyncOutcome::cached(state.cached()),
                    };
                }
            }

            state.last_attempt = Some(now);
            state.phase = SyncPhase::Syncing;
        }

        info!(%trigger, "Sync cycle started");

        let healthy = self.health.check_health().await;
        lock(&self.state).connection.last_health_check = Some(Utc::now());
        if !healthy {
            return self.fail(trigger, SyncError::Unreachable.to_string());
        }

        let source = self
            .source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(source) = source else {
            return self.fail(trigger, SyncError::NoSyncFunction.to_string());
        };

        match source.fetch().await {
            Ok(payload) => {
                let records = coerce_records(payload, "sync function");
                let outcome = {
                    let mut state = lock(&self.state);
                    state.cache = Some(records.clone());
                    state.connection.consecutive_failures = 0;
                    state.connection.last_error = None;
                    state.connection.last_successful_sync = Some(Utc::now());
                    if state.phase == SyncPhase::Syncing {
                        state.phase = SyncPhase::OnlineIdle;
                    }
                    SyncOutcome::fresh(records)
                };

                info!(%trigger, records = outcome.data.len(), "Sync cycle completed");
                self.notify(&outcome);

                CycleReport {
                    kind: CycleKind::Completed,
                    outcome,
                }
            }
            Err(e) => self.fail(trigger, e.to_string()),
        }
    }

    fn fail(&self, trigger: SyncTrigger, error: String) -> CycleReport {
        let (outcome, failures) = {
            let mut state = lock(&self.state);
            state.connection.consecutive_failures =
                state.connection.consecutive_failures.saturating_add(1);
            state.connection.last_error = Some(error.clone());
            if state.phase == SyncPhase::Syncing {
                state.phase = SyncPhase::OnlineIdle;
            }
            (
                SyncOutcome::failed(state.cached(), error.clone()),
                state.connection.consecutive_failures,
            )
        };

        warn!(
            %trigger,
            error = %error,
            consecutive_failures = failures,
            "Sync cycle failed, serving cache"
        );
        self.notify(&outcome);

        CycleReport {
            kind: CycleKind::Failed,
            outcome,
        }
    }

    fn skipped(&self, kind: CycleKind) -> CycleReport {
        CycleReport {
            kind,
            outcome: SyncOutcome::cached(lock(&self.state).cached()),
        }
    }

    fn notify(&self, outcome: &SyncOutcome) {
        let subscribers = lock(&self.subscribers).entries.clone();
        for (id, callback) in &subscribers {
            deliver(*id, callback, outcome);
        }
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Applies a transport event. Reconnecting only leaves OFFLINE once a
    /// health probe succeeds.
    pub async fn handle_transport(&self, event: TransportEvent) -> SyncPhase {
        match event {
            TransportEvent::Disconnected => {
                let mut state = lock(&self.state);
                state.connection.is_online = false;
                state.phase = SyncPhase::Offline;
                info!("Transport disconnected, going offline");
                SyncPhase::Offline
            }
            TransportEvent::Connected => {
                lock(&self.state).connection.is_online = true;
                info!("Transport connected, probing order service");
                self.probe().await;
                self.phase()
            }
        }
    }

    /// Runs a health probe outside a cycle.
    ///
    /// Failures count toward `consecutive_failures` but never clear
    /// `is_online`; only the transport does that.
    pub async fn probe(&self) -> bool {
        let healthy = self.health.check_health().await;

        let mut state = lock(&self.state);
        state.connection.last_health_check = Some(Utc::now());
        if healthy {
            if state.phase == SyncPhase::Offline && state.connection.is_online {
                state.phase = SyncPhase::OnlineIdle;
                info!("Order service reachable, back online");
            }
        } else {
            state.connection.consecutive_failures =
                state.connection.consecutive_failures.saturating_add(1);
            state.connection.last_error = Some(SyncError::Unreachable.to_string());
        }
        healthy
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Installs data loaded at startup (snapshot or durable store) without
    /// notifying anyone. Ignored once a cycle has produced data.
    pub fn seed_cache(&self, data: Vec<Value>) {
        let mut state = lock(&self.state);
        if state.cache.is_none() {
            debug!(records = data.len(), "Cache seeded");
            state.cache = Some(data);
        }
    }

    /// Replaces the cache after a local mutation and notifies subscribers.
    pub fn apply_local(&self, data: Vec<Value>) {
        lock(&self.state).cache = Some(data.clone());
        self.notify(&SyncOutcome::cached(data));
    }

    // =========================================================================
    // Read-only snapshots
    // =========================================================================

    pub fn get_status(&self) -> ConnectionStatus {
        lock(&self.state).connection.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        lock(&self.state).phase
    }

    pub fn has_cached_data(&self) -> bool {
        lock(&self.state).cache.is_some()
    }

    /// Current cache, or an empty list before the first success.
    pub fn get_cached_data(&self) -> Vec<Value> {
        lock(&self.state).cached()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).entries.len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
