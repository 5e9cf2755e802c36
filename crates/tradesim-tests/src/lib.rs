//! Integration tests for the TradeSim server.
//!
//! Each test starts its own server on an ephemeral loopback port, so tests
//! run in parallel without any external process.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tradesim_client::TradeClient;
use tradesim_server::{Config, Server, ServerError};

/// How long tests wait for a single expected message.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for an ephemeral test server.
///
/// `tick_interval_ms` controls the broadcast period; pass `None` to disable
/// market data so only responses are observed.
#[must_use]
pub fn test_config(tick_interval_ms: Option<u64>) -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    match tick_interval_ms {
        Some(ms) => config.server.tick_interval_ms = ms,
        None => config.simulation.enabled = false,
    }
    config
}

/// A server running on a background task.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Binds and starts a server for `config`.
    ///
    /// # Errors
    /// Returns error if the server cannot bind.
    pub async fn start(config: Config) -> Result<Self, ServerError> {
        let server = Server::from_config(&config).await?;
        let addr = server.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async move {
            let _ = rx.await;
        }));
        Ok(Self {
            addr,
            shutdown: Some(tx),
            handle,
        })
    }

    /// Address the server is listening on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connects a new client.
    ///
    /// # Errors
    /// Returns error if the connection fails.
    pub async fn client(&self) -> Result<TradeClient, tradesim_client::Error> {
        TradeClient::connect(self.addr).await
    }

    /// Stops the server and waits for the event loop to exit.
    ///
    /// # Errors
    /// Returns error if the event loop task panicked.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await
    }
}
