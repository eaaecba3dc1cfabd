//! # Courier Agent
//!
//! Headless host for the sync engine.
//!
//! ```text
//! engine.toml + COURIER_* ──► EngineConfig ──► SyncEngine ──► scheduler
//!                                                  │
//!                               subscriber logs every completed cycle
//!
//! Ctrl+C / SIGTERM ──► scheduler shutdown ──► store closed
//! ```
//!
//! Usage: `courier-agent [path/to/engine.toml]`

use std::path::PathBuf;

use courier_sync::{EngineConfig, SyncEngine};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_filter = init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match EngineConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load engine configuration");
            return Err(e.into());
        }
    };

    if config.debug && std::env::var_os("RUST_LOG").is_none() {
        if let Err(e) = log_filter.reload(EnvFilter::new(DEBUG_FILTER)) {
            warn!(error = %e, "Failed to enable debug logging");
        }
    }

    info!(
        base_url = %config.api.base_url,
        database = %config.database_path().display(),
        "Starting courier agent"
    );

    let engine = SyncEngine::builder(config).build().await?;

    engine.subscribe(|outcome| {
        if outcome.success {
            info!(orders = outcome.data.len(), cached = outcome.cached, "Orders updated");
        } else {
            warn!(
                orders = outcome.data.len(),
                error = outcome.error.as_deref().unwrap_or_default(),
                "Serving cached orders"
            );
        }
    });

    let handle = engine.start();

    shutdown_signal().await;

    handle.shutdown().await?;

    let status = engine.status().await;
    info!(
        phase = %status.phase,
        pending_outbox = status.pending_outbox,
        failed_operations = status.failed_operations,
        "Final engine status"
    );
    engine.close().await;

    info!("Courier agent stopped");
    Ok(())
}

const DEFAULT_FILTER: &str = "info,sqlx=warn";
const DEBUG_FILTER: &str = "info,courier=debug,sqlx=warn";

/// Initializes structured logging before anything else runs. `RUST_LOG`
/// wins over the defaults; the returned handle switches to the debug filter
/// once the configuration asks for it.
fn init_tracing() -> reload::Handle<EnvFilter, Registry> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping sync engine");
}
