//! Gridlock Server
//!
//! Authoritative room server binary: wires the in-memory stores to the
//! WebSocket gateway and runs until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridlock::accounts::InMemoryAccounts;
use gridlock::network::server::{Gateway, GatewayConfig};
use gridlock::session::coordinator::Coordinator;
use gridlock::session::store::{RoomStore, StoreConfig};
use gridlock::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env();
    info!("Gridlock Server v{}", VERSION);
    info!("bind address: {}", config.bind_addr);
    if !config.auth.is_configured() {
        warn!("no AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; connections cannot authenticate");
    }

    let accounts = Arc::new(InMemoryAccounts::new());
    let store = Arc::new(RoomStore::new(StoreConfig::default()));
    let coordinator = Arc::new(Coordinator::new(store, accounts.clone()));
    let gateway = Arc::new(Gateway::new(config, coordinator, accounts));

    tokio::select! {
        result = gateway.clone().run() => {
            result.context("gateway stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            gateway.shutdown();
        }
    }

    Ok(())
}
