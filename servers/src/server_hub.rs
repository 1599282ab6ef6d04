//! # Live Update Hub
//!
//! Accepts push-channel clients on `/ws`, greets each one, and fans every
//! envelope posted to `/broadcast` out to all of them. Slow clients are evicted
//! instead of slowing anybody else down.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use lib_common::core::hub::Hub;
use lib_common::loggers::setup_logging;
use servers::hub_logic::{config, routes};
use servers::shared::{metrics, shutdown::shutdown_signal};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = config::load_config().context("invalid hub configuration")?;
    let _log_guard = setup_logging("server_hub", &config.log_dir(), config.log_level())?;
    info!(?config, "configuration loaded");

    // --- Phase 1: Core engine ---
    let (hub, hub_task) = Hub::spawn(config.hub_config());

    // --- Phase 2: Web layer ---
    let state = Arc::new(routes::AppState {
        hub,
        session: config.session_config(),
        metrics: metrics::install_recorder()?,
    });
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Live update hub listening on ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("hub server failed")?;

    // Upgraded sessions outlive the listener and still hold hub handles.
    hub_task.abort();
    info!("Shutdown complete.");
    Ok(())
}
