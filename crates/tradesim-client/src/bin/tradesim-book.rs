//! Connects to a TradeSim server, logs in and prints the top of book for
//! each market data broadcast.
//!
//! Environment:
//! - `TRADESIM_ADDR`: server address (default `127.0.0.1:8000`)
//! - `TRADESIM_USER` / `TRADESIM_PASSWORD`: login credentials
//! - `FRAMES`: number of broadcasts to print before exiting (default: forever)

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tradesim_client::{ServerMessage, TradeClient};

#[tokio::main]
async fn main() -> Result<(), tradesim_client::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let addr = std::env::var("TRADESIM_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
    let username = std::env::var("TRADESIM_USER").unwrap_or_default();
    let password = std::env::var("TRADESIM_PASSWORD").unwrap_or_default();
    let frames: Option<usize> = std::env::var("FRAMES").ok().and_then(|v| v.parse().ok());

    info!("Connecting to {}", addr);
    let mut client = TradeClient::connect(addr.as_str()).await?;
    client.login(&username, &password).await?;

    let mut seen = 0usize;
    while frames.is_none_or(|limit| seen < limit) {
        match client.recv().await? {
            ServerMessage::Login(response) if response.is_success() => {
                info!("Logged in: {}", response.msg.unwrap_or_default());
            }
            ServerMessage::Login(response) => {
                warn!(
                    "Login rejected ({}): {}",
                    response.status,
                    response.error.unwrap_or_default()
                );
            }
            ServerMessage::MarketData(snapshot) => {
                seen += 1;
                let mut symbols: Vec<_> = snapshot.data.iter().collect();
                symbols.sort_by(|a, b| a.0.cmp(b.0));
                for (symbol, book) in symbols {
                    let bid = book.best_bid().map(|l| format!("{}@{}", l.volume, l.price));
                    let ask = book.best_ask().map(|l| format!("{}@{}", l.volume, l.price));
                    info!(
                        "[{}] {} bid {} / ask {}",
                        snapshot.timestamp,
                        symbol,
                        bid.as_deref().unwrap_or("-"),
                        ask.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }

    Ok(())
}
