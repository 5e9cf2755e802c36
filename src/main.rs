//! TradeSim Server
//!
//! Simulated trading and market data server.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tradesim_server::{Config, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from file if provided
    let mut config = match std::env::var("TRADESIM_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            Config::load(&path)?
        }
        Err(_) => Config::default(),
    };

    // Environment overrides
    if let Ok(host) = std::env::var("HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("PORT") {
        config.server.port = port.parse()?;
    }

    info!(
        "Simulating {} symbol(s), broadcasting every {}ms",
        config.symbols.len(),
        config.server.tick_interval_ms
    );

    let server = Server::from_config(&config).await?;
    server.run().await;

    Ok(())
}
