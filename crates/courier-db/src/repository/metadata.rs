//! # Metadata Repository
//!
//! Small JSON values keyed by string: sync bookkeeping and the registry of
//! permanently failed outbox operations.
//!
//! ## Well-Known Keys
//! ```text
//! last_sync_at        RFC 3339 time of the last successful order sync
//! last_sync_error     message of the most recent failure (cleared on success)
//! failed_op:<id>      FailedOperation for a dropped outbox entry
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::{from_millis, to_millis};
use crate::error::DbResult;
use courier_core::FailedOperation;

/// Key holding the time of the last successful sync.
pub const LAST_SYNC_AT_KEY: &str = "last_sync_at";

/// Key holding the last sync or delivery error.
pub const LAST_SYNC_ERROR_KEY: &str = "last_sync_error";

/// Prefix of failed operation keys.
pub const FAILED_OP_PREFIX: &str = "failed_op:";

/// Metadata key for the failed operation with outbox id `id`.
pub fn failed_op_key(id: &str) -> String {
    format!("{}{}", FAILED_OP_PREFIX, id)
}

#[derive(Debug, FromRow)]
struct MetadataRow {
    key: String,
    value: String,
    updated_at: i64,
}

/// A stored metadata value with its key and write time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MetadataRow> for MetadataEntry {
    type Error = crate::error::DbError;

    fn try_from(row: MetadataRow) -> Result<Self, Self::Error> {
        Ok(MetadataEntry {
            key: row.key,
            value: serde_json::from_str(&row.value)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

/// Upserts one metadata value on an open connection or transaction.
pub(crate) async fn write_value(
    conn: &mut SqliteConnection,
    key: &str,
    value: &str,
    updated_at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO metadata (key, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(to_millis(updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn delete_key(conn: &mut SqliteConnection, key: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM metadata WHERE key = ?1")
        .bind(key)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Repository for metadata values.
#[derive(Debug, Clone)]
pub struct MetadataRepository {
    pool: SqlitePool,
}

impl MetadataRepository {
    /// Creates a new MetadataRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MetadataRepository { pool }
    }

    /// Stores `value` under `key` (last write wins).
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.pool.acquire().await?;
        write_value(&mut conn, key, &json, Utc::now()).await
    }

    /// Reads and deserializes the value under `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Returns every entry ordered by key.
    pub async fn get_all(&self) -> DbResult<Vec<MetadataEntry>> {
        let rows: Vec<MetadataRow> =
            sqlx::query_as("SELECT key, value, updated_at FROM metadata ORDER BY key")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(MetadataEntry::try_from).collect()
    }

    /// Returns every entry whose key starts with `prefix`, oldest write first.
    pub async fn get_by_prefix(&self, prefix: &str) -> DbResult<Vec<MetadataEntry>> {
        // substr instead of LIKE: '_' in prefixes is a LIKE wildcard
        let rows: Vec<MetadataRow> = sqlx::query_as(
            r#"
            SELECT key, value, updated_at FROM metadata
            WHERE substr(key, 1, length(?1)) = ?1
            ORDER BY updated_at ASC, key ASC
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MetadataEntry::try_from).collect()
    }

    /// Deletes the value under `key`. Returns true if it existed.
    pub async fn delete(&self, key: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        delete_key(&mut conn, key).await
    }

    /// Deletes every value.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM metadata")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Sync bookkeeping
    // =========================================================================

    /// Records a successful sync: stamps `last_sync_at` and clears
    /// `last_sync_error` in one transaction.
    pub async fn record_sync_success(&self, at: DateTime<Utc>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        write_value(&mut tx, LAST_SYNC_AT_KEY, &serde_json::to_string(&at)?, at).await?;
        delete_key(&mut tx, LAST_SYNC_ERROR_KEY).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Records a failed sync cycle.
    pub async fn record_sync_failure(&self, error: &str, at: DateTime<Utc>) -> DbResult<()> {
        let json = serde_json::to_string(error)?;
        let mut conn = self.pool.acquire().await?;
        write_value(&mut conn, LAST_SYNC_ERROR_KEY, &json, at).await
    }

    /// Time of the last successful sync, if any.
    pub async fn last_sync_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.get(LAST_SYNC_AT_KEY).await
    }

    /// Last recorded sync or delivery error, if any.
    pub async fn last_sync_error(&self) -> DbResult<Option<String>> {
        self.get(LAST_SYNC_ERROR_KEY).await
    }

    // =========================================================================
    // Failed operations
    // =========================================================================

    /// Lists permanently failed outbox operations, oldest first.
    pub async fn failed_operations(&self) -> DbResult<Vec<FailedOperation>> {
        self.get_by_prefix(FAILED_OP_PREFIX)
            .await?
            .into_iter()
            .map(|entry| Ok(serde_json::from_value(entry.value)?))
            .collect()
    }

    /// Number of permanently failed outbox operations.
    pub async fn count_failed_operations(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM metadata WHERE substr(key, 1, length(?1)) = ?1",
        )
        .bind(FAILED_OP_PREFIX)
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
    use serde_json::json;

    async fn repo() -> MetadataRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().metadata()
    }

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let repo = repo().await;
        repo.put("theme", &json!({"dark": true})).await.unwrap();
        repo.put("theme", &json!({"dark": false})).await.unwrap();

        let value: Value = repo.get("theme").await.unwrap().unwrap();
        assert_eq!(value, json!({"dark": false}));
        assert_eq!(repo.get::<Value>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prefix_does_not_treat_underscore_as_wildcard() {
        let repo = repo().await;
        repo.put("failed_op:1", &1).await.unwrap();
        repo.put("failedXop:2", &2).await.unwrap();
        repo.put("other", &3).await.unwrap();

        let entries = repo.get_by_prefix(FAILED_OP_PREFIX).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "failed_op:1");
        assert_eq!(repo.get_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sync_success_clears_last_error() {
        let repo = repo().await;
        let at = Utc::now();

        repo.record_sync_failure("timeout", at).await.unwrap();
        assert_eq!(repo.last_sync_error().await.unwrap().as_deref(), Some("timeout"));

        repo.record_sync_success(at).await.unwrap();
        assert_eq!(repo.last_sync_error().await.unwrap(), None);
        assert_eq!(
            repo.last_sync_at().await.unwrap().map(|t| t.timestamp_millis()),
            Some(at.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let repo = repo().await;
        repo.put("a", &1).await.unwrap();
        repo.put("b", &2).await.unwrap();

        assert!(repo.delete("a").await.unwrap());
        assert!(!repo.delete("a").await.unwrap());
        assert_eq!(repo.clear().await.unwrap(), 1);
    }
}
