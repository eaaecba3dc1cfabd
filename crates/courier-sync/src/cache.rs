//! # Cached Resource (TTL facade)
//!
//! Read-through cache for auxiliary resources (drivers, zones, menus) on
//! top of the durable cache collection.
//!
//! ## Read Decision
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  age < ttl                       ──► cached value                      │
//! │  ttl ≤ age < max_age, SWR on     ──► cached value + background refresh │
//! │  no entry, or age ≥ max_age      ──► await fetch, store, return        │
//! │                                                                         │
//! │  fetch failed ──► any stored value, however stale ──► else error       │
//! │                                                                         │
//! │  Background refresh failures are logged and never reach the caller.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use courier_core::CacheEntry;
use courier_db::LocalStore;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::SyncResult;

/// Freshness policy for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub ttl: Duration,
    pub max_age: Duration,
    pub stale_while_revalidate: bool,
}

impl ReadOptions {
    /// `ttl = CACHE_DURATION`, `max_age = ttl * max_age_multiplier`, SWR on.
    pub fn from_config(config: &EngineConfig) -> Self {
        ReadOptions {
            ttl: config.cache_ttl(),
            max_age: config.cache_max_age(),
            stale_while_revalidate: true,
        }
    }
}

#[derive(Clone)]
pub struct CachedResource {
    store: Arc<LocalStore>,
    /// Entries that could not be written durably.
    memory: Arc<Mutex<HashMap<String, CacheEntry>>>,
    /// Keys with a background refresh running.
    refreshing: Arc<Mutex<HashSet<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CachedResource {
    pub fn new(store: Arc<LocalStore>) -> Self {
        CachedResource {
            store,
            memory: Arc::new(Mutex::new(HashMap::new())),
            refreshing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reads `key`, fetching from `url` via `fetcher` when needed.
    pub async fn read<F, Fut>(
        &self,
        key: &str,
        url: &str,
        fetcher: F,
        options: ReadOptions,
    ) -> SyncResult<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<Value>> + Send + 'static,
    {
        let cached = self.lookup(key).await;

        if let Some(entry) = &cached {
            let age = entry.age_at(Utc::now()).to_std().unwrap_or_default();

            if age < options.ttl {
                debug!(key, age_ms = age.as_millis() as u64, "Cache hit");
                return Ok(entry.data.clone());
            }

            if age < options.max_age && options.stale_while_revalidate {
                debug!(key, age_ms = age.as_millis() as u64, "Serving stale entry, revalidating");
                self.spawn_refresh(key, url, fetcher, options);
                return Ok(entry.data.clone());
            }
        }

        match self.fetch_and_store(key, url, fetcher, options).await {
            Ok(data) => Ok(data),
            Err(e) => match cached {
                Some(entry) => {
                    warn!(key, error = %e, "Fetch failed, serving stored entry regardless of age");
                    Ok(entry.data)
                }
                None => Err(e),
            },
        }
    }

    /// Removes `key` from both tiers.
    pub async fn invalidate(&self, key: &str) -> SyncResult<()> {
        lock(&self.memory).remove(key);
        if let Ok(cache) = self.store.cache().await {
            cache.delete(key).await?;
        }
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        if let Ok(cache) = self.store.cache().await {
            match cache.peek(key).await {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "Cache read failed"),
            }
        }
        lock(&self.memory).get(key).cloned()
    }

    async fn fetch_and_store<F, Fut>(
        &self,
        key: &str,
        url: &str,
        fetcher: F,
        options: ReadOptions,
    ) -> SyncResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<Value>>,
    {
        let data = fetcher().await?;

        let max_age = chrono::Duration::from_std(options.max_age)
            .ok()
            .filter(|max_age| *max_age > chrono::Duration::zero());
        let entry = CacheEntry::new(key, url, data.clone(), max_age);

        let stored = match self.store.cache().await {
            Ok(cache) => cache.put(&entry).await,
            Err(e) => Err(e),
        };
        match stored {
            Ok(entry) => {
                lock(&self.memory).remove(key);
                debug!(key, version = entry.version, "Cache entry refreshed");
            }
            Err(e) => {
                debug!(key, error = %e, "Keeping cache entry in memory");
                lock(&self.memory).insert(key.to_string(), entry);
            }
        }

        Ok(data)
    }

    fn spawn_refresh<F, Fut>(&self, key: &str, url: &str, fetcher: F, options: ReadOptions)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<Value>> + Send + 'static,
    {
        if !lock(&self.refreshing).insert(key.to_string()) {
            debug!(key, "Refresh already running");
            return;
        }

        let resource = self.clone();
        let key = key.to_string();
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = resource.fetch_and_store(&key, &url, fetcher, options).await {
                warn!(key = %key, error = %e, "Background refresh failed");
            }
            lock(&resource.refreshing).remove(&key);
        });
    }
}
