//! # Engine Types
//!
//! Core types shared by the durable store and the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Engine Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌──────────────────────┐  │
//! │  │   CacheEntry    │   │   OutboxEntry   │   │  ConnectionStatus    │  │
//! │  │  ─────────────  │   │  ─────────────  │   │  ──────────────────  │  │
//! │  │  id             │   │  id (UUID)      │   │  is_online           │  │
//! │  │  url            │   │  method, url    │   │  last_health_check   │  │
//! │  │  data (JSON)    │   │  data (JSON?)   │   │  last_successful_sync│  │
//! │  │  timestamp      │   │  timestamp      │   │  consecutive_failures│  │
//! │  │  expires_at?    │   │  retry_count    │   │  last_error          │  │
//! │  │  version        │   │  max_retries    │   └──────────────────────┘  │
//! │  └─────────────────┘   └─────────────────┘                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌──────────────────────┐  │
//! │  │   SyncPhase     │   │   SyncOutcome   │   │  FailedOperation     │  │
//! │  │  Offline        │   │  success        │   │  entry + error       │  │
//! │  │  OnlineIdle     │   │  data           │   │  (dropped outbox     │  │
//! │  │  Syncing        │   │  cached, error  │   │   entry, retriable)  │  │
//! │  └─────────────────┘   └─────────────────┘   └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The persisted shapes use camelCase field names so that snapshots and
//! exported JSON read the same as what the dashboard already consumes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// HTTP Method
// =============================================================================

/// HTTP method of a queued write.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Returns the canonical upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(CoreError::UnknownMethod(other.to_string())),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached payload fetched from (or preloaded for) a remote URL.
///
/// ## Lifecycle
/// ```text
/// fetch/preload ──► put (version 1) ──► overwrite (version + 1) ──► ...
///                                          │
///                  read after expires_at ──┴──► deleted lazily
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Cache key (e.g. `orders:all`, `drivers`).
    pub id: String,

    /// Source URL the payload was fetched from.
    pub url: String,

    /// The cached payload.
    #[ts(type = "unknown")]
    pub data: Value,

    /// When the payload was stored.
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,

    /// When the entry stops being readable. Always later than `timestamp`.
    #[ts(as = "Option<String>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Bumped by the store on every overwrite.
    pub version: i64,
}

impl CacheEntry {
    /// Creates a version-1 entry stored now, optionally expiring after `ttl`.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        data: Value,
        ttl: Option<Duration>,
    ) -> Self {
        Self::stored_at(id, url, data, Utc::now(), ttl)
    }

    /// Creates a version-1 entry with an explicit store time.
    pub fn stored_at(
        id: impl Into<String>,
        url: impl Into<String>,
        data: Value,
        timestamp: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Self {
        CacheEntry {
            id: id.into(),
            url: url.into(),
            data,
            timestamp,
            expires_at: ttl.map(|ttl| timestamp + ttl),
            version: 1,
        }
    }

    /// Checks the `expires_at > timestamp` invariant.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Required("id".into()));
        }

        match self.expires_at {
            Some(expires_at) if expires_at <= self.timestamp => Err(CoreError::InvalidCacheEntry {
                id: self.id.clone(),
                reason: format!(
                    "expires_at {} is not after timestamp {}",
                    expires_at, self.timestamp
                ),
            }),
            _ => Ok(()),
        }
    }

    /// Returns true if the entry is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Age of the payload at `now`. Never negative.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }
}

// =============================================================================
// Outbox Entry
// =============================================================================

/// A write performed while offline (or optimistically) that still has to
/// reach the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// HTTP method to replay.
    pub method: HttpMethod,

    /// Target URL, absolute or relative to the configured base URL.
    pub url: String,

    /// JSON body, if the request has one.
    #[ts(type = "unknown")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// When the write was enqueued.
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,

    /// Failed delivery attempts so far.
    pub retry_count: i64,

    /// Attempts allowed before the entry is dropped as a permanent failure.
    pub max_retries: i64,
}

impl OutboxEntry {
    /// Creates a fresh entry with `retry_count = 0`.
    pub fn new(
        method: HttpMethod,
        url: impl Into<String>,
        data: Option<Value>,
        max_retries: i64,
    ) -> Self {
        OutboxEntry {
            id: Uuid::new_v4().to_string(),
            method,
            url: url.into(),
            data,
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries,
        }
    }

    /// Checks the `0 <= retry_count <= max_retries` invariant.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.url.trim().is_empty() {
            return Err(CoreError::Required("url".into()));
        }
        if self.max_retries < 1 {
            return Err(CoreError::InvalidOutboxEntry {
                id: self.id.clone(),
                reason: format!("max_retries must be at least 1, got {}", self.max_retries),
            });
        }
        if self.retry_count < 0 || self.retry_count > self.max_retries {
            return Err(CoreError::InvalidOutboxEntry {
                id: self.id.clone(),
                reason: format!(
                    "retry_count {} outside 0..={}",
                    self.retry_count, self.max_retries
                ),
            });
        }
        Ok(())
    }

    /// Records one failed delivery attempt.
    ///
    /// Returns true when the entry has now used up its retries and must be
    /// dropped.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.is_exhausted()
    }

    /// Returns true once `retry_count` has reached `max_retries`.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// An outbox entry that exhausted its retries.
///
/// Kept in the metadata collection so the dashboard can show it and the
/// operator can push it back into the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    pub entry: OutboxEntry,
    pub error: String,
    #[ts(as = "String")]
    pub failed_at: DateTime<Utc>,
}

// =============================================================================
// Connection Status
// =============================================================================

/// Coarse state of the sync coordinator.
///
/// `ONLINE_ERROR` is not a separate phase: it is `OnlineIdle` with
/// `ConnectionStatus::last_error` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Offline,
    #[default]
    OnlineIdle,
    Syncing,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Offline => write!(f, "offline"),
            SyncPhase::OnlineIdle => write!(f, "online_idle"),
            SyncPhase::Syncing => write!(f, "syncing"),
        }
    }
}

/// Process-wide connectivity view. Written only by the sync coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Transport-level connectivity. Health probe failures do not clear it.
    pub is_online: bool,

    #[ts(as = "Option<String>")]
    pub last_health_check: Option<DateTime<Utc>>,

    #[ts(as = "Option<String>")]
    pub last_successful_sync: Option<DateTime<Utc>>,

    pub consecutive_failures: u32,

    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus {
            is_online: true,
            last_health_check: None,
            last_successful_sync: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Read-only status snapshot handed to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub phase: SyncPhase,
    pub connection: ConnectionStatus,
    pub pending_outbox: i64,
    pub failed_operations: i64,
    pub storage_degraded: bool,
}

// =============================================================================
// Sync Outcome
// =============================================================================

/// Result of one fetch cycle, as delivered to subscribers and callers.
///
/// `data` is always populated: fresh data, the last good cache, or an
/// explicit empty list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    #[ts(type = "Array<unknown>")]
    pub data: Vec<Value>,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    /// Fresh data straight from the sync function.
    pub fn fresh(data: Vec<Value>) -> Self {
        SyncOutcome {
            success: true,
            data,
            cached: false,
            error: None,
        }
    }

    /// Cached data served without a network call.
    pub fn cached(data: Vec<Value>) -> Self {
        SyncOutcome {
            success: true,
            data,
            cached: true,
            error: None,
        }
    }

    /// Cached data served because the cycle failed.
    pub fn failed(data: Vec<Value>, error: impl Into<String>) -> Self {
        SyncOutcome {
            success: false,
            data,
            cached: true,
            error: Some(error.into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_method_parsing() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!("PATCH".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_cache_entry_expiry() {
        let stored = Utc::now();
        let entry = CacheEntry::stored_at(
            "drivers",
            "/api/drivers",
            json!([1, 2]),
            stored,
            Some(Duration::seconds(60)),
        );

        assert!(entry.validate().is_ok());
        assert!(!entry.is_expired_at(stored + Duration::seconds(59)));
        assert!(entry.is_expired_at(stored + Duration::seconds(60)));
        assert_eq!(entry.age_at(stored - Duration::seconds(5)), Duration::zero());
    }

    #[test]
    fn test_cache_entry_rejects_expiry_before_store_time() {
        let mut entry = CacheEntry::new("k", "/k", json!(null), None);
        entry.expires_at = Some(entry.timestamp);
        assert!(matches!(
            entry.validate(),
            Err(CoreError::InvalidCacheEntry { .. })
        ));
    }

    #[test]
    fn test_outbox_entry_failure_counting() {
        let mut entry = OutboxEntry::new(HttpMethod::Put, "/orders/1", Some(json!({})), 3);
        assert_eq!(entry.retry_count, 0);

        assert!(!entry.record_failure());
        assert!(!entry.record_failure());
        assert!(entry.record_failure());
        assert_eq!(entry.retry_count, 3);

        // Never exceeds max_retries
        assert!(entry.record_failure());
        assert_eq!(entry.retry_count, 3);
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn test_outbox_entry_shape() {
        let entry = OutboxEntry::new(HttpMethod::Post, "/orders", None, 3);
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["method"], "POST");
        assert_eq!(value["retryCount"], 0);
        assert_eq!(value["maxRetries"], 3);
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_connection_status_default_is_online() {
        let status = ConnectionStatus::default();
        assert!(status.is_online);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(SyncPhase::default(), SyncPhase::OnlineIdle);
    }
}
