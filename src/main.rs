//! CapOrSlap Game Server
//!
//! Authoritative game server for CapOrSlap.
//! Serves runs, guesses and leaderboards over WebSocket.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cap_or_slap::{
    VERSION,
    config::{ServerConfig, StoreBackend},
    core::clock::{Clock, SystemClock},
    game::Catalog,
    network::GameServer,
    service::GameService,
};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    info!("CapOrSlap Server v{}", VERSION);

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("failed to load catalog from {}", path.display()))?,
        None => {
            info!("CATALOG_PATH not set, using bundled sample catalog");
            Catalog::sample().context("bundled catalog is invalid")?
        }
    };
    info!("Catalog: {} items", catalog.len());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = config.build_store(clock.clone())?;
    match &config.store {
        StoreBackend::Memory => info!("Store: in-memory"),
        StoreBackend::Remote { url, .. } => info!("Store: remote at {}", url),
        StoreBackend::Disabled => info!("Store: disabled"),
    }

    if config.game.reprieve.waive_paid {
        warn!(
            audit = true,
            "WAIVE_PAID_REPRIEVES is on: paid reprieves are granted without payment"
        );
    }
    if !config.auth.is_configured() {
        warn!("JWT auth not configured, user ids are taken from requests");
    }

    let service = GameService::new(Arc::new(catalog), store, clock, config.game.clone())
        .with_verifiers(config.build_share_verifier()?, config.build_payment_verifier()?);

    let server = GameServer::new(config, Arc::new(service));
    server.run().await?;

    Ok(())
}
