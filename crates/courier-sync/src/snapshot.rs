//! Flat JSON snapshot of the last synced order list.
//!
//! Written after every successful cycle and read at startup, before the
//! durable store is opened, so the dashboard can paint immediately. A
//! snapshot with a different schema version, or one that does not parse,
//! is ignored.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use courier_core::SNAPSHOT_SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub orders: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the snapshot. The file is written next to the target and
    /// renamed over it, so readers never see a partial snapshot.
    pub async fn write(&self, orders: &[Value]) -> SyncResult<()> {
        let snapshot = Snapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            orders: orders.to_vec(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error("create directory", e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| self.error("write", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.error("rename", e))?;

        debug!(path = %self.path.display(), orders = orders.len(), "Snapshot written");
        Ok(())
    }

    /// Loads the snapshot, or `None` if it is missing or unusable.
    pub async fn read(&self) -> Option<Snapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Snapshot unreadable");
                return None;
            }
        };

        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) if snapshot.schema_version == SNAPSHOT_SCHEMA_VERSION => Some(snapshot),
            Ok(snapshot) => {
                warn!(
                    found = snapshot.schema_version,
                    expected = SNAPSHOT_SCHEMA_VERSION,
                    "Discarding snapshot with a different schema version"
                );
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding corrupt snapshot");
                None
            }
        }
    }

    fn error(&self, action: &str, e: std::io::Error) -> SyncError {
        SyncError::Snapshot(format!("{} {}: {}", action, self.path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Snapshot location inside a not-yet-created subdirectory of `dir`.
    fn snapshot_in(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("state").join("orders-snapshot.json")
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(snapshot_in(&dir));
        let orders = vec![json!({"id": "1"}), json!({"id": "2"})];

        file.write(&orders).await.unwrap();
        let snapshot = file.read().await.unwrap();

        assert_eq!(snapshot.orders, orders);
        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert!(!file.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_or_foreign_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_in(&dir);
        let file = SnapshotFile::new(&path);
        assert!(file.read().await.is_none());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            json!({"schemaVersion": 99, "savedAt": "2024-05-01T10:00:00Z", "orders": []}).to_string(),
        )
        .unwrap();
        assert!(file.read().await.is_none());

        std::fs::write(&path, "{not json").unwrap();
        assert!(file.read().await.is_none());
    }
}
