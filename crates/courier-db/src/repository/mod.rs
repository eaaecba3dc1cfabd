//! # Repository Module
//!
//! One repository per logical collection of the durable store.
//!
//! ## Collections
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Durable Store Collections                            │
//! │                                                                         │
//! │  db.cache()     ──► CacheRepository     (cache_entries)                │
//! │                     put / get / get_all / get_by_url / delete / clear   │
//! │                     purge_expired / evict_oldest                        │
//! │                                                                         │
//! │  db.outbox()    ──► OutboxRepository    (sync_outbox)                  │
//! │                     put / get / get_all / get_by_url / delete / clear   │
//! │                     record_retry / record_permanent_failure / requeue   │
//! │                                                                         │
//! │  db.metadata()  ──► MetadataRepository  (metadata)                     │
//! │                     put / get / get_all / get_by_prefix / delete / clear│
//! │                     record_sync_success / record_sync_failure           │
//! │                                                                         │
//! │  All three share one pool, so compound operations that touch more     │
//! │  than one collection commit in a single SQLite transaction.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `put` is last-write-wins by id.

pub mod cache;
pub mod metadata;
pub mod outbox;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{DbError, DbResult};

/// Timestamps are stored as epoch milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DbResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DbError::Serialization(format!("timestamp out of range: {}", millis)))
}
