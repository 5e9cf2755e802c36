//! Event loop multiplexing the listener, the broadcast timer and every client
//! socket.
//!
//! The [`Server`] exclusively owns the connection table. Only its event loop
//! touches sockets: accepts, reads, framing and flushes all happen there,
//! while request handling runs on each connection's worker.

use crate::config::{Config, ServerConfig};
use crate::connection::{
    Connection, ConnectionId, FlushOutcome, ReadOutcome, ReadinessEvent, ReadinessFuture,
    WriteNotifier,
};
use crate::error::ServerError;
use crate::market_data::MarketDataGenerator;
use futures::FutureExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::Ready;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How long accepting pauses after a listener error.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Why a connection was torn down.
#[derive(Debug)]
enum CloseReason {
    HungUp,
    PeerClosed,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    ReadBufferOverflow(usize),
    PollFailed(io::Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HungUp => write!(f, "hung up"),
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::ReadFailed(e) => write!(f, "read failed: {}", e),
            Self::WriteFailed(e) => write!(f, "write failed: {}", e),
            Self::ReadBufferOverflow(n) => write!(f, "{} undecoded bytes buffered", n),
            Self::PollFailed(e) => write!(f, "readiness failed: {}", e),
        }
    }
}

/// Trade simulation server.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    generator: Option<MarketDataGenerator>,
    connections: HashMap<ConnectionId, Connection>,
    readiness: FuturesUnordered<ReadinessFuture>,
    notify_tx: mpsc::UnboundedSender<ConnectionId>,
    notify_rx: mpsc::UnboundedReceiver<ConnectionId>,
    next_id: u64,
    scratch: Vec<u8>,
    accept_resume_at: Option<Instant>,
}

impl Server {
    /// Binds the listener described by `config`.
    ///
    /// # Errors
    /// Returns error if the address is not loopback or cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let scratch = vec![0u8; config.read_chunk_bytes];

        Ok(Self {
            config,
            listener,
            generator: None,
            connections: HashMap::new(),
            readiness: FuturesUnordered::new(),
            notify_tx,
            notify_rx,
            next_id: 1,
            scratch,
            accept_resume_at: None,
        })
    }

    /// Validates `config`, binds the listener and attaches a market data
    /// generator when simulation is enabled.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or binding fails.
    pub async fn from_config(config: &Config) -> Result<Self, ServerError> {
        config.validate()?;
        let mut server = Self::bind(config.server.clone()).await?;
        if config.simulation.enabled {
            server.set_market_data_generator(MarketDataGenerator::from_config(
                &config.symbols,
                &config.simulation,
            ));
        } else {
            info!("Market data simulation disabled");
        }
        Ok(server)
    }

    /// Attaches the generator used on timer ticks.
    pub fn set_market_data_generator(&mut self, generator: MarketDataGenerator) {
        self.generator = Some(generator);
    }

    /// Builder form of [`set_market_data_generator`](Self::set_market_data_generator).
    #[must_use]
    pub fn with_market_data_generator(mut self, generator: MarketDataGenerator) -> Self {
        self.set_market_data_generator(generator);
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    /// Returns error if the socket address cannot be queried.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs the event loop until `shutdown` completes, then tears down every
    /// connection.
    ///
    /// Accept and socket errors are handled per connection and never end the
    /// loop.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = self.config.tick_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept(), if self.accept_resume_at.is_none() => {
                    self.handle_accept(accepted);
                }
                () = tokio::time::sleep_until(self.accept_resume_at.unwrap_or_else(Instant::now)),
                    if self.accept_resume_at.is_some() =>
                {
                    self.accept_resume_at = None;
                }
                _ = ticker.tick() => self.handle_timer(),
                Some(id) = self.notify_rx.recv() => self.notify_writable(id),
                Some((id, event)) = self.readiness.next() => self.handle_readiness(id, event),
            }
        }

        self.stop();
    }

    /// Registers the accepted connection, then every other pending one.
    ///
    /// A listener error other than an aborted handshake pauses accepting for
    /// [`ACCEPT_BACKOFF`].
    fn handle_accept(&mut self, first: io::Result<(TcpStream, SocketAddr)>) {
        let mut next = Some(first);
        while let Some(accepted) = next.take() {
            match accepted {
                Ok((stream, peer)) => self.register(stream, peer),
                Err(e) if is_per_connection_error(&e) => {
                    debug!("Accept aborted: {}", e);
                }
                Err(e) => {
                    warn!("Accept failed, pausing for {:?}: {}", ACCEPT_BACKOFF, e);
                    self.accept_resume_at = Some(Instant::now() + ACCEPT_BACKOFF);
                    return;
                }
            }
            next = self.listener.accept().now_or_never();
        }
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let conn = match Connection::new(
            id,
            stream,
            peer,
            WriteNotifier::new(self.notify_tx.clone()),
            self.config.max_read_buffer_bytes,
        ) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Dropping connection {} from {}: worker not started: {}", id, peer, e);
                return;
            }
        };
        self.readiness.push(conn.readiness());
        self.connections.insert(id, conn);
        info!("Accepted connection {} from {}", id, peer);
    }

    fn handle_timer(&mut self) {
        let Some(generator) = self.generator.as_mut() else {
            return;
        };
        match generator.make_market_data() {
            Ok(payload) => {
                let reached = self.broadcast(&payload);
                debug!("Broadcast {} bytes of market data to {} connections", payload.len(), reached);
            }
            Err(e) => warn!("Failed to encode market data: {}", e),
        }
    }

    /// Appends `payload` to every live connection and requests write
    /// readiness for each. Returns the number of connections reached.
    pub fn broadcast(&mut self, payload: &[u8]) -> usize {
        for conn in self.connections.values_mut() {
            conn.append_to_write_buffer(payload);
            conn.arm_write();
        }
        self.connections.len()
    }

    fn notify_writable(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.arm_write();
        }
    }

    fn handle_readiness(&mut self, id: ConnectionId, event: ReadinessEvent) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        let serviced = match event {
            ReadinessEvent::InterestChanged => Ok(()),
            ReadinessEvent::Failed(e) => Err(CloseReason::PollFailed(e)),
            ReadinessEvent::Ready(ready) => service(conn, ready, &mut self.scratch),
        };

        match serviced {
            Ok(()) => self.readiness.push(conn.readiness()),
            Err(reason) => {
                debug!("Connection {} {}", id, reason);
                self.close_connection(id);
            }
        }
    }

    fn close_connection(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.remove(&id) {
            let peer = conn.peer();
            conn.shutdown();
            info!("Closed connection {} from {}", id, peer);
        }
    }

    fn stop(mut self) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.close_connection(id);
        }
        self.readiness.clear();
        info!("Server stopped");
    }
}

/// Errors that concern a single half-open connection, not the listener.
fn is_per_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

/// Handles one readiness event for a connection.
fn service(conn: &mut Connection, ready: Ready, scratch: &mut [u8]) -> Result<(), CloseReason> {
    if ready.is_read_closed() && ready.is_write_closed() {
        return Err(CloseReason::HungUp);
    }

    if ready.is_readable() {
        match conn.read_available(scratch) {
            ReadOutcome::Drained => {}
            ReadOutcome::Closed => return Err(CloseReason::PeerClosed),
            ReadOutcome::Failed(e) => return Err(CloseReason::ReadFailed(e)),
        }
        while conn.try_parse_read_buffer() {}
        if conn.read_buffer_overflowed() {
            warn!(
                "Connection {} exceeded the read buffer bound",
                conn.id()
            );
            return Err(CloseReason::ReadBufferOverflow(conn.buffered_read_bytes()));
        }
    }

    if ready.is_writable() && conn.is_write_armed() {
        match conn.flush_write_buffer() {
            FlushOutcome::Drained => conn.disarm_write(),
            FlushOutcome::Pending => {}
            FlushOutcome::Fatal(e) => {
                warn!("Connection {} write failed: {}", conn.id(), e);
                return Err(CloseReason::WriteFailed(e));
            }
        }
    }

    Ok(())
}
