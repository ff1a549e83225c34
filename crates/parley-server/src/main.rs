//! # parley-server
//!
//! Real-time chat backend for Parley.
//!
//! This binary provides:
//! - **Presence**: who has a live WebSocket right now, broadcast to everyone
//!   on every change
//! - **Delivery**: `sent -> delivered -> read` tracking with receipts pushed
//!   back to the sender, plus delete-for-me and delete-for-everyone
//! - **Fanout** of direct and group messages to online recipients
//! - **Unseen counters** per conversation, rebuilt from the store on connect
//! - **REST API** (axum) for users, groups, history and health checks

mod api;
mod config;
mod delivery;
mod error;
mod fanout;
mod groups;
mod hub;
mod presence;
mod unseen;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_shared::constants::APP_NAME;
use parley_store::{Database, SqliteStore};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::ChatHub;

// One dispatch thread: handlers interleave only at store calls.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and build the hub
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database ready");
    }

    let hub = Arc::new(ChatHub::new(Arc::new(SqliteStore::new(db))));

    let http_addr = config.http_addr;
    let app_state = AppState {
        hub,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP / WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
