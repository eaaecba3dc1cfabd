//! # Cache Repository
//!
//! Fetched and preloaded payloads keyed by id.
//!
//! ## Expiry
//! ```text
//! put(entry)             ── version 1, or version + 1 on overwrite
//! get(id) before expiry  ── identical payload
//! get(id) after expiry   ── None, and the row is deleted
//! peek(id)               ── whatever is stored, expired or not
//! ```
//!
//! `peek` exists for fallback reads: when a fetch fails, stale data is
//! still better than nothing.
//!
//! ## Eviction
//! Only entries written with an expiry take part in [`CacheRepository::evict_oldest`].
//! Entries without one (the local order set) are never evicted.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use super::{from_millis, to_millis};
use crate::error::DbResult;
use courier_core::CacheEntry;

/// Raw `cache_entries` row.
#[derive(Debug, FromRow)]
struct CacheRow {
    id: String,
    url: String,
    data: String,
    timestamp: i64,
    expires_at: Option<i64>,
    version: i64,
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = crate::error::DbError;

    fn try_from(row: CacheRow) -> Result<Self, Self::Error> {
        Ok(CacheEntry {
            id: row.id,
            url: row.url,
            data: serde_json::from_str(&row.data)?,
            timestamp: from_millis(row.timestamp)?,
            expires_at: row.expires_at.map(from_millis).transpose()?,
            version: row.version,
        })
    }
}

fn into_entries(rows: Vec<CacheRow>) -> DbResult<Vec<CacheEntry>> {
    rows.into_iter().map(CacheEntry::try_from).collect()
}

const SELECT_COLUMNS: &str = "SELECT id, url, data, timestamp, expires_at, version FROM cache_entries";

/// Repository for cache entries.
#[derive(Debug, Clone)]
pub struct CacheRepository {
    pool: SqlitePool,
}

impl CacheRepository {
    /// Creates a new CacheRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CacheRepository { pool }
    }

    /// Stores an entry, replacing any entry with the same id.
    ///
    /// The stored version is 1 for a new id and the previous version + 1 on
    /// overwrite; the caller's `version` field is ignored.
    ///
    /// ## Returns
    /// The entry as stored (with its version).
    pub async fn put(&self, entry: &CacheEntry) -> DbResult<CacheEntry> {
        entry.validate()?;

        let data = serde_json::to_string(&entry.data)?;

        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO cache_entries (id, url, data, timestamp, expires_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, 1)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                data = excluded.data,
                timestamp = excluded.timestamp,
                expires_at = excluded.expires_at,
                version = cache_entries.version + 1
            RETURNING version
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.url)
        .bind(data)
        .bind(to_millis(entry.timestamp))
        .bind(entry.expires_at.map(to_millis))
        .fetch_one(&self.pool)
        .await?;

        debug!(id = %entry.id, version, "Cache entry stored");

        Ok(CacheEntry {
            version,
            ..entry.clone()
        })
    }

    /// Reads an entry, deleting it if it has expired.
    pub async fn get(&self, id: &str) -> DbResult<Option<CacheEntry>> {
        self.get_at(id, Utc::now()).await
    }

    /// Reads an entry as of `now`, deleting it if it has expired.
    pub async fn get_at(&self, id: &str, now: DateTime<Utc>) -> DbResult<Option<CacheEntry>> {
        let Some(entry) = self.peek(id).await? else {
            return Ok(None);
        };

        if entry.is_expired_at(now) {
            debug!(id = %id, "Cache entry expired, deleting");
            self.delete(id).await?;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    /// Reads an entry regardless of expiry. Never deletes.
    pub async fn peek(&self, id: &str) -> DbResult<Option<CacheEntry>> {
        let row: Option<CacheRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CacheEntry::try_from).transpose()
    }

    /// Returns all unexpired entries, newest first.
    pub async fn get_all(&self) -> DbResult<Vec<CacheEntry>> {
        let rows: Vec<CacheRow> = sqlx::query_as(&format!(
            "{} WHERE expires_at IS NULL OR expires_at > ?1 ORDER BY timestamp DESC",
            SELECT_COLUMNS
        ))
        .bind(to_millis(Utc::now()))
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    /// Returns all unexpired entries fetched from `url` (the url index).
    pub async fn get_by_url(&self, url: &str) -> DbResult<Vec<CacheEntry>> {
        let rows: Vec<CacheRow> = sqlx::query_as(&format!(
            "{} WHERE url = ?1 AND (expires_at IS NULL OR expires_at > ?2) ORDER BY timestamp DESC",
            SELECT_COLUMNS
        ))
        .bind(url)
        .bind(to_millis(Utc::now()))
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    /// Deletes an entry. Returns true if it existed.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes every entry.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Deletes every entry that has expired as of `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1")
                .bind(to_millis(now))
                .execute(&self.pool)
                .await?;

        if result.rows_affected() > 0 {
            debug!(purged = result.rows_affected(), "Purged expired cache entries");
        }

        Ok(result.rows_affected())
    }

    /// Keeps the `max_entries` newest expiring entries and deletes the rest.
    pub async fn evict_oldest(&self, max_entries: u32) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM cache_entries
            WHERE expires_at IS NOT NULL
              AND id NOT IN (
                SELECT id FROM cache_entries
                WHERE expires_at IS NOT NULL
                ORDER BY timestamp DESC, id ASC
                LIMIT ?1
              )
            "#,
        )
        .bind(i64::from(max_entries))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(
                evicted = result.rows_affected(),
                max_entries, "Evicted oldest cache entries"
            );
        }

        Ok(result.rows_affected())
    }

    /// Number of stored entries, expired or not.
    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use serde_json::json;

    async fn repo() -> CacheRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().cache()
    }

    #[tokio::test]
    async fn test_read_before_expiry_returns_identical_payload() {
        let repo = repo().await;
        let payload = json!({"drivers": [{"id": 7, "name": "Ana"}], "total": 1});
        let entry = CacheEntry::new("drivers", "/api/drivers", payload.clone(), Some(Duration::minutes(5)));

        repo.put(&entry).await.unwrap();
        let read = repo.get("drivers").await.unwrap().unwrap();

        assert_eq!(read.data, payload);
        assert_eq!(read.url, "/api/drivers");
        assert_eq!(read.version, 1);
    }

    #[tokio::test]
    async fn test_read_after_expiry_returns_none_and_deletes() {
        let repo = repo().await;
        let stored = Utc::now() - Duration::minutes(10);
        let entry = CacheEntry::stored_at("zones", "/api/zones", json!([1]), stored, Some(Duration::minutes(1)));
        repo.put(&entry).await.unwrap();

        // Still physically present before the read
        assert!(repo.peek("zones").await.unwrap().is_some());

        assert!(repo.get("zones").await.unwrap().is_none());
        assert!(repo.peek("zones").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overwrite_bumps_version() {
        let repo = repo().await;
        let first = repo
            .put(&CacheEntry::new("k", "/k", json!(1), None))
            .await
            .unwrap();
        let second = repo
            .put(&CacheEntry::new("k", "/k", json!(2), None))
            .await
            .unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(repo.get("k").await.unwrap().unwrap().data, json!(2));
    }

    #[tokio::test]
    async fn test_invalid_entry_rejected() {
        let repo = repo().await;
        let mut entry = CacheEntry::new("bad", "/bad", json!(null), None);
        entry.expires_at = Some(entry.timestamp - Duration::seconds(1));

        assert!(repo.put(&entry).await.is_err());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_by_url_and_clear() {
        let repo = repo().await;
        repo.put(&CacheEntry::new("a", "/api/x", json!(1), None)).await.unwrap();
        repo.put(&CacheEntry::new("b", "/api/x", json!(2), None)).await.unwrap();
        repo.put(&CacheEntry::new("c", "/api/y", json!(3), None)).await.unwrap();

        assert_eq!(repo.get_by_url("/api/x").await.unwrap().len(), 2);
        assert_eq!(repo.get_all().await.unwrap().len(), 3);
        assert!(repo.delete("c").await.unwrap());
        assert!(!repo.delete("c").await.unwrap());

        assert_eq!(repo.clear().await.unwrap(), 2);
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_and_evict() {
        let repo = repo().await;
        let now = Utc::now();
        let ttl = Some(Duration::hours(1));

        for i in 0..4 {
            let stored = now - Duration::minutes(10 - i);
            repo.put(&CacheEntry::stored_at(format!("e{}", i), "/e", json!(i), stored, ttl))
                .await
                .unwrap();
        }
        repo.put(&CacheEntry::stored_at("pinned", "/o", json!([]), now - Duration::days(2), None))
            .await
            .unwrap();
        repo.put(&CacheEntry::stored_at(
            "old",
            "/old",
            json!(0),
            now - Duration::hours(3),
            Some(Duration::hours(1)),
        ))
        .await
        .unwrap();

        assert_eq!(repo.purge_expired(now).await.unwrap(), 1);

        // Keep the two newest expiring entries; the pinned one is untouched
        assert_eq!(repo.evict_oldest(2).await.unwrap(), 2);
        assert!(repo.peek("e3").await.unwrap().is_some());
        assert!(repo.peek("e2").await.unwrap().is_some());
        assert!(repo.peek("e0").await.unwrap().is_none());
        assert!(repo.peek("pinned").await.unwrap().is_some());
    }
}
