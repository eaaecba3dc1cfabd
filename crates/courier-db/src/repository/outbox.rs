//! # Outbox Repository
//!
//! Durable queue of writes that still have to reach the order service.
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue ──► put(entry, retry_count = 0)                               │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │            drain pass ──► delivered ──► delete(id)                      │
//! │                 │                                                       │
//! │                 └──► failed                                             │
//! │                        │                                                │
//! │                        ├── retry_count < max ──► record_retry           │
//! │                        │      ┌───────── ONE TRANSACTION ──────────┐    │
//! │                        │      │ UPDATE sync_outbox.retry_count     │    │
//! │                        │      │ UPSERT metadata.last_sync_error    │    │
//! │                        │      └────────────────────────────────────┘    │
//! │                        │                                                │
//! │                        └── retry_count = max ──► record_permanent_failure│
//! │                               ┌───────── ONE TRANSACTION ──────────┐    │
//! │                               │ DELETE FROM sync_outbox            │    │
//! │                               │ UPSERT metadata.failed_op:<id>     │    │
//! │                               │ UPSERT metadata.last_sync_error    │    │
//! │                               └────────────────────────────────────┘    │
//! │                                                                         │
//! │  requeue_failed(id) moves a failed_op back into the queue with         │
//! │  retry_count = 0, again in one transaction.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Enqueue order is the `seq` column; overwriting an entry keeps its place.

use chrono::Utc;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::metadata::{delete_key, failed_op_key, write_value, LAST_SYNC_ERROR_KEY};
use super::{from_millis, to_millis};
use crate::error::{DbError, DbResult};
use courier_core::{FailedOperation, HttpMethod, OutboxEntry};

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: String,
    method: HttpMethod,
    url: String,
    data: Option<String>,
    timestamp: i64,
    retry_count: i64,
    max_retries: i64,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = DbError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxEntry {
            id: row.id,
            method: row.method,
            url: row.url,
            data: row.data.as_deref().map(serde_json::from_str).transpose()?,
            timestamp: from_millis(row.timestamp)?,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
        })
    }
}

fn into_entries(rows: Vec<OutboxRow>) -> DbResult<Vec<OutboxEntry>> {
    rows.into_iter().map(OutboxEntry::try_from).collect()
}

const SELECT_COLUMNS: &str =
    "SELECT id, method, url, data, timestamp, retry_count, max_retries FROM sync_outbox";

async fn upsert_entry(conn: &mut SqliteConnection, entry: &OutboxEntry) -> DbResult<()> {
    entry.validate()?;

    let data = entry.data.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO sync_outbox (id, method, url, data, timestamp, retry_count, max_retries)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            data = excluded.data,
            timestamp = excluded.timestamp,
            retry_count = excluded.retry_count,
            max_retries = excluded.max_retries
        "#,
    )
    .bind(&entry.id)
    .bind(entry.method)
    .bind(&entry.url)
    .bind(data)
    .bind(to_millis(entry.timestamp))
    .bind(entry.retry_count)
    .bind(entry.max_retries)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Repository for the sync outbox.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Stores an entry, replacing any entry with the same id.
    pub async fn put(&self, entry: &OutboxEntry) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_entry(&mut conn, entry).await?;

        debug!(
            id = %entry.id,
            method = %entry.method,
            url = %entry.url,
            retry_count = entry.retry_count,
            "Outbox entry stored"
        );
        Ok(())
    }

    /// Reads one entry.
    pub async fn get(&self, id: &str) -> DbResult<Option<OutboxEntry>> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(OutboxEntry::try_from).transpose()
    }

    /// Returns all pending entries in enqueue order.
    pub async fn get_all(&self) -> DbResult<Vec<OutboxEntry>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!("{} ORDER BY seq ASC", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        into_entries(rows)
    }

    /// Returns pending entries targeting `url` (the url index), in enqueue order.
    pub async fn get_by_url(&self, url: &str) -> DbResult<Vec<OutboxEntry>> {
        let rows: Vec<OutboxRow> =
            sqlx::query_as(&format!("{} WHERE url = ?1 ORDER BY seq ASC", SELECT_COLUMNS))
                .bind(url)
                .fetch_all(&self.pool)
                .await?;

        into_entries(rows)
    }

    /// Deletes an entry. Returns true if it existed.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_outbox WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes every entry.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sync_outbox")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Number of pending entries.
    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM sync_outbox")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Compound operations
    // =========================================================================

    /// Persists an entry's incremented retry count together with the
    /// delivery error.
    pub async fn record_retry(&self, entry: &OutboxEntry, error: &str) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        upsert_entry(&mut tx, entry).await?;
        write_value(&mut tx, LAST_SYNC_ERROR_KEY, &serde_json::to_string(error)?, now).await?;

        tx.commit().await?;

        debug!(
            id = %entry.id,
            retry_count = entry.retry_count,
            max_retries = entry.max_retries,
            "Outbox retry recorded"
        );
        Ok(())
    }

    /// Drops an exhausted entry from the queue and registers it as a failed
    /// operation.
    pub async fn record_permanent_failure(&self, failed: &FailedOperation) -> DbResult<()> {
        let value = serde_json::to_string(failed)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sync_outbox WHERE id = ?1")
            .bind(&failed.entry.id)
            .execute(&mut *tx)
            .await?;
        write_value(&mut tx, &failed_op_key(&failed.entry.id), &value, failed.failed_at).await?;
        write_value(
            &mut tx,
            LAST_SYNC_ERROR_KEY,
            &serde_json::to_string(&failed.error)?,
            failed.failed_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Moves a failed operation back into the queue with a fresh retry
    /// budget.
    ///
    /// ## Returns
    /// The re-enqueued entry, or `None` if no failed operation has that id.
    pub async fn requeue_failed(&self, id: &str) -> DbResult<Option<OutboxEntry>> {
        let key = failed_op_key(id);
        let mut tx = self.pool.begin().await?;

        let value: Option<String> = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?1")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(value) = value else {
            return Ok(None);
        };

        let failed: FailedOperation = serde_json::from_str(&value)?;
        let entry = OutboxEntry {
            retry_count: 0,
            timestamp: Utc::now(),
            ..failed.entry
        };

        // Re-inserted rows get a new seq, so the entry goes to the back
        sqlx::query("DELETE FROM sync_outbox WHERE id = ?1")
            .bind(&entry.id)
            .execute(&mut *tx)
            .await?;
        upsert_entry(&mut tx, &entry).await?;
        delete_key(&mut tx, &key).await?;

        tx.commit().await?;

        info!(id = %entry.id, url = %entry.url, "Failed operation re-enqueued");
        Ok(Some(entry))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_all_in_enqueue_order() {
        let repo = db().await.outbox();
        let first = OutboxEntry::new(HttpMethod::Post, "/orders", Some(json!({"n": 1})), 3);
        let second = OutboxEntry::new(HttpMethod::Put, "/orders/9", Some(json!({"n": 2})), 3);
        let third = OutboxEntry::new(HttpMethod::Delete, "/orders/9", None, 3);

        for entry in [&first, &second, &third] {
            repo.put(entry).await.unwrap();
        }

        // Overwriting keeps the original position
        let mut updated = first.clone();
        updated.retry_count = 1;
        repo.put(&updated).await.unwrap();

        let all = repo.get_all().await.unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str(), third.id.as_str()]);
        assert_eq!(all[0].retry_count, 1);
        assert_eq!(all[2].data, None);
        assert_eq!(repo.get_by_url("/orders/9").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_entry_over_retry_budget_rejected() {
        let repo = db().await.outbox();
        let mut entry = OutboxEntry::new(HttpMethod::Post, "/orders", None, 3);
        entry.retry_count = 4;

        assert!(matches!(repo.put(&entry).await, Err(DbError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_record_retry_writes_error_atomically() {
        let db = db().await;
        let repo = db.outbox();
        let mut entry = OutboxEntry::new(HttpMethod::Patch, "/orders/1", Some(json!({})), 3);
        repo.put(&entry).await.unwrap();

        entry.record_failure();
        repo.record_retry(&entry, "HTTP 503").await.unwrap();

        assert_eq!(repo.get(&entry.id).await.unwrap().unwrap().retry_count, 1);
        assert_eq!(
            db.metadata().last_sync_error().await.unwrap().as_deref(),
            Some("HTTP 503")
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_and_requeue() {
        let db = db().await;
        let repo = db.outbox();
        let mut entry = OutboxEntry::new(HttpMethod::Put, "/orders/1", Some(json!({"price": 5})), 2);
        repo.put(&entry).await.unwrap();

        entry.record_failure();
        entry.record_failure();
        let failed = FailedOperation {
            entry: entry.clone(),
            error: "HTTP 422".into(),
            failed_at: Utc::now(),
        };
        repo.record_permanent_failure(&failed).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 0);
        let registry = db.metadata().failed_operations().await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry[0].entry.id, entry.id);
        assert_eq!(registry[0].entry.retry_count, 2);

        let requeued = repo.requeue_failed(&entry.id).await.unwrap().unwrap();
        assert_eq!(requeued.retry_count, 0);
        assert_eq!(requeued.data, Some(json!({"price": 5})));
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(db.metadata().count_failed_operations().await.unwrap(), 0);

        assert!(repo.requeue_failed(&entry.id).await.unwrap().is_none());
    }
}
