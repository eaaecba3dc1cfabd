//! # courier-sync: Offline-First Sync Engine for the Courier Dashboard
//!
//! Keeps the dashboard's order list usable whether or not the order
//! service is reachable: fresh data when online, the last good data when
//! not, and a durable outbox for edits made in between.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Engine Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncEngine (root service)                        │  │
//! │  │                                                                  │  │
//! │  │  Owned by the host, one per process                              │  │
//! │  │  Background scheduler: sync tick, health tick, retries           │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │SyncCoordinator │  │   SyncQueue    │  │   CachedResource       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Rate limit,    │  │ Outbox replay, │  │ TTL + stale-while-     │    │
//! │  │ in-flight,     │  │ bounded retry, │  │ revalidate reads of    │    │
//! │  │ subscribers    │  │ failed ops     │  │ auxiliary resources    │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          ▼                                                              │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  HealthProber  │  │   Reconciler   │  │     SnapshotFile       │    │
//! │  │ multi-endpoint │  │ LWW merge with │  │ flat JSON for instant  │    │
//! │  │ reachability   │  │ local edits    │  │ first paint            │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  PLUGGABLE SEAMS (closures implement them):                            │
//! │  • OrderSource  - fetch the remote order payload                       │
//! │  • HealthCheck  - decide reachability                                  │
//! │  • OutboxSender - deliver one queued write                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine`, builder and scheduler
//! - [`coordinator`] - Fetch cycles, connection status, subscribers
//! - [`health`] - Health probing
//! - [`source`] - Order fetch seam and HTTP adapter
//! - [`reconcile`] - Local/remote merge and the durable local order set
//! - [`outbox`] - Sync queue, drain and failed operations
//! - [`cache`] - TTL facade for auxiliary resources
//! - [`snapshot`] - Cold-start snapshot file
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_sync::{EngineConfig, SyncEngine, TransportEvent};
//!
//! let config = EngineConfig::load(None)?;
//! let engine = SyncEngine::builder(config).build().await?;
//!
//! engine.subscribe(|outcome| println!("{} orders", outcome.data.len()));
//! let handle = engine.start();
//!
//! engine.handle_transport_event(TransportEvent::Disconnected).await;
//! handle.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod health;
mod http;
pub mod outbox;
pub mod reconcile;
pub mod snapshot;
pub mod source;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::{CachedResource, ReadOptions};
pub use config::EngineConfig;
pub use coordinator::{
    CoordinatorSettings, CycleKind, CycleReport, Subscription, SyncCoordinator, SyncTrigger,
    TransportEvent,
};
pub use engine::{EngineHandle, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use health::{HealthCheck, HealthProber};
pub use outbox::{DrainReport, HttpOutboxSender, OutboxSender, SyncQueue};
pub use reconcile::Reconciler;
pub use snapshot::{Snapshot, SnapshotFile};
pub use source::{HttpOrderSource, OrderSource};
