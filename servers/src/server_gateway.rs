//! # API Gateway
//!
//! Fronts the query API with per-identity sliding-window admission backed by
//! Redis, and forwards accepted queries to the live update hub.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use lib_common::admission::{AdmissionController, Gate};
use lib_common::connections::RedisCounterStore;
use lib_common::loggers::setup_logging;
use servers::gateway_logic::{config, notifier::HubNotifier, routes};
use servers::shared::{metrics, shutdown::shutdown_signal};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Invalid limits or windows stop us here, before anything is bound.
    let config = config::load_config().context("invalid gateway configuration")?;
    let _log_guard = setup_logging("server_gateway", &config.log_dir(), config.log_level())?;
    info!(?config, "configuration loaded");

    // --- Phase 1: Admission ---
    let store = RedisCounterStore::connect(config.redis_url())
        .await
        .context("failed to connect to the admission store")?;
    let default = AdmissionController::new(store.clone(), config.admission_config()?);
    let mut gate = Gate::new(default, config.policy());
    let trusted = config.trusted_identities();
    if !trusted.is_empty() {
        info!(count = trusted.len(), "trusted identities configured");
        gate = gate.with_trusted(trusted, AdmissionController::new(store, config.trusted_admission_config()?));
    }

    // --- Phase 2: Hub forwarding ---
    let notifier = match &config.hub_broadcast_url {
        Some(url) => Some(HubNotifier::new(url.clone(), config.hub_notify_timeout())?),
        None => None,
    };

    // --- Phase 3: Web layer ---
    let state = Arc::new(routes::AppState {
        gate,
        notifier,
        metrics: metrics::install_recorder()?,
    });
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("API gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server failed")?;

    info!("Shutdown complete.");
    Ok(())
}
