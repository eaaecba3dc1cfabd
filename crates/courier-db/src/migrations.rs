//! Schema migrations for the durable store.
//!
//! The SQL lives in the workspace `migrations/sqlite` directory and is
//! compiled into the binary. Files are applied in sequence-number order,
//! each in its own transaction; applied files are recorded by sqlx and are
//! never re-run, so a shipped migration must not be edited afterwards.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Brings the schema up to date.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    debug!(known = MIGRATOR.migrations.len(), "Applying store migrations");
    MIGRATOR.run(pool).await?;
    info!("Store schema up to date");
    Ok(())
}

/// Number of migrations recorded as applied in this database.
pub async fn applied_count(pool: &SqlitePool) -> DbResult<usize> {
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;
    Ok(applied as usize)
}

/// Number of migrations embedded in this build.
pub fn embedded_count() -> usize {
    MIGRATOR.migrations.len()
}
