mod broadcast;
mod config;
mod connection;
mod error;
mod heartbeat;
mod protocol;
mod session;
mod store;
mod transport;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use config::{Args, RelayConfig};
use connection::ConnectionRegistry;
use heartbeat::HeartbeatMonitor;
use session::{OrphanReaper, SessionManager};
use store::{FirebaseStore, MemoryStore, RetryingStore, SessionStore};
use transport::AppState;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::try_from(Args::parse())?;
    let store = build_store(&config);

    let registry = Arc::new(ConnectionRegistry::new());
    let sessions = Arc::new(SessionManager::new(
        registry.clone(),
        store,
        config.viewer_capacity,
        config.mailbox_limit,
    ));

    let _heartbeat = HeartbeatMonitor::new(registry.clone(), sessions.clone(), config.heartbeat_interval).start();
    info!(interval_secs = config.heartbeat_interval.as_secs(), "heartbeat monitor started");

    match config.orphan_ttl {
        Some(ttl) => {
            let reaper = OrphanReaper::new(sessions.clone(), ttl, config.reaper_interval);
            tokio::spawn(reaper.run());
            info!(ttl_secs = ttl.as_secs(), "orphan reaper started");
        }
        None => info!("orphan reaper disabled"),
    }

    let app = transport::router(AppState::new(sessions));
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, viewer_capacity = config.viewer_capacity, "location relay listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("location relay stopped");
    Ok(())
}

fn build_store(config: &RelayConfig) -> Arc<dyn SessionStore> {
    match &config.database_url {
        Some(url) => {
            info!(database_url = %url, "using realtime database store");
            let store = FirebaseStore::new(url.as_str(), config.database_secret.clone());
            Arc::new(RetryingStore::new(store, config.store_timeout, config.store_retries))
        }
        None => {
            warn!("DATABASE_URL not set, sessions are kept in memory only");
            Arc::new(RetryingStore::new(
                MemoryStore::new(),
                config.store_timeout,
                config.store_retries,
            ))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
