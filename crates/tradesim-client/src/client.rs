//! TCP client for the TradeSim server.

use crate::error::Error;
use crate::types::{ClientCommand, ServerMessage};
use serde::Serialize;
use serde_json::{Deserializer, Value};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;


/// Size of a single socket read.
const READ_CHUNK: usize = 4096;

/// Client connection to the server.
///
/// The server sends concatenated JSON objects with no delimiter; the client
/// keeps any partial object buffered until the rest of it arrives.
pub struct TradeClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TradeClient {
    /// Connects to the server.
    ///
    /// # Arguments
    /// * `addr` - Server address (e.g., "127.0.0.1:8000")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buffer: Vec::new(),
        })
    }

    /// Serializes and sends a request.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub async fn send<T: Serialize>(&mut self, request: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec(request)?;
        self.send_raw(&bytes).await
    }

    /// Sends raw bytes unchanged.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Sends a login request.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), Error> {
        self.send(&ClientCommand::login(username, password)).await
    }

    /// Receives the next JSON value from the server.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionClosed`] if the server closes the stream and
    /// [`Error::Malformed`] if the stream cannot be decoded.
    pub async fn recv_value(&mut self) -> Result<Value, Error> {
        loop {
            if let Some(value) = self.decode_buffered()? {
                return Ok(value);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Receives the next typed message from the server.
    ///
    /// # Errors
    /// Returns error if the connection closes or the message is not recognised.
    pub async fn recv(&mut self) -> Result<ServerMessage, Error> {
        let value = self.recv_value().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Receives the next message, or `None` if nothing arrives within
    /// `timeout`.
    ///
    /// # Errors
    /// Returns error if the connection closes or the message is not recognised.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ServerMessage>, Error> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Receives messages until one that is not a market data broadcast
    /// arrives, or `timeout` elapses.
    ///
    /// # Errors
    /// Returns error if the connection closes or a message is not recognised.
    pub async fn recv_response(&mut self, timeout: Duration) -> Result<Option<ServerMessage>, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_timeout(remaining).await? {
                Some(ServerMessage::MarketData(_)) => continue,
                other => return Ok(other),
            }
        }
    }

    // Same framing rules as the server's `FrameDecoder` (whitespace skip,
    // EOF means incomplete, anything else is malformed); change both together.
    fn decode_buffered(&mut self) -> Result<Option<Value>, Error> {
        let Some(start) = self.buffer.iter().position(|b| !b.is_ascii_whitespace()) else {
            self.buffer.clear();
            return Ok(None);
        };

        let mut stream = Deserializer::from_slice(&self.buffer[start..]).into_iter::<Value>();
        let (value, consumed) = match stream.next() {
            Some(Ok(value)) => (value, start + stream.byte_offset()),
            Some(Err(e)) if e.is_eof() => return Ok(None),
            Some(Err(e)) => {
                self.buffer.clear();
                return Err(Error::Malformed(e.to_string()));
            }
            None => return Ok(None),
        };

        self.buffer.drain(..consumed);
        debug!("Decoded {} bytes, {} buffered", consumed, self.buffer.len());
        Ok(Some(value))
    }
}
