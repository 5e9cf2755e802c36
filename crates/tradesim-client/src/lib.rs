//! TCP client library for the TradeSim server.
//!
//! This crate provides a typed client for the server's concatenated-JSON
//! protocol: sending requests, and receiving responses and market data
//! broadcasts from an undelimited byte stream.
//!
//! # Example
//!
//! ```no_run
//! use tradesim_client::{ServerMessage, TradeClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tradesim_client::Error> {
//!     let mut client = TradeClient::connect("127.0.0.1:8000").await?;
//!     client.login("alice", "secret").await?;
//!
//!     loop {
//!         match client.recv().await? {
//!             ServerMessage::Login(response) => println!("login status {}", response.status),
//!             ServerMessage::MarketData(snapshot) => println!("snapshot at {}", snapshot.timestamp),
//!         }
//!     }
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::TradeClient;
pub use error::Error;
pub use types::*;
