//! # TradeSim Server - Simulated Market Data over TCP
//!
//! A TCP server that speaks a stream of concatenated JSON objects. Clients
//! send requests keyed by an `action` field and receive one response per
//! recognised request. Every connected client also receives a periodic
//! top-of-book snapshot generated from randomized, self-evolving order books.
//!
//! ## Key Features
//!
//! - **Single Event Loop**: One task multiplexes the listener, the broadcast
//!   timer and every client socket using non-blocking reads and writes.
//!
//! - **Per-Connection Workers**: Requests are handed to a dedicated worker thread
//!   per connection through a closable blocking queue, so slow handlers never stall
//!   socket I/O and responses keep request order.
//!
//! - **Exact Framing**: Values are split from the byte stream using the byte
//!   offsets reported by the JSON parser; partial values wait for more bytes.
//!
//! - **Synthetic Liquidity**: Order books drift their mid price, decay volume
//!   with depth, tilt one side, cluster on round prices and leave random gaps.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────── Server (event loop) ───────────────────────┐
//!  TcpListener ──▶ │ accept ──▶ Connection { FrameDecoder, WriteBuffer, HandoffQueue }   │
//!  interval    ──▶ │ tick   ──▶ MarketDataGenerator ──▶ broadcast to every Connection    │
//!  sockets     ──▶ │ ready  ──▶ read / frame / flush                                    │
//!                  └────────────────────────────────────────────────────────────────────┘
//!                                        │ Request            ▲ Response bytes
//!                                        ▼                    │
//!                                 worker (one thread per connection)
//! ```
//!
//! ## Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | TOML configuration and validation |
//! | [`connection`] | Per-connection buffers, framing hand-off and worker |
//! | [`error`] | Server error type |
//! | [`framing`] | JSON value extraction from an undelimited stream |
//! | [`market_data`] | Snapshot generation across all simulated symbols |
//! | [`protocol`] | Request decoding, dispatch and responses |
//! | [`queue`] | Closable blocking handoff queue |
//! | [`server`] | The event loop |
//! | [`simulation`] | Randomized order book |
//!
//! ## Wire Protocol
//!
//! ```text
//! → {"action":"login","username":"u","password":"p"}
//! ← {"action":"login","status":200,"msg":"Login successful"}
//!
//! → {"action":"login"}
//! ← {"action":"login","status":403,"error":"Invalid username or password"}
//!
//! ← {"action":"market_data","event":"market_data",
//!    "data":{"A":{"buy":[{"price":100,"volume":41},...],"sell":[...]}},
//!    "timestamp":1700000000000}
//! ```
//!
//! Requests with a missing or unknown `action` are dropped without a reply.
//!
//! ## Example Usage
//!
//! ```bash
//! # Defaults: 127.0.0.1:8000, one symbol "A" around 100
//! cargo run
//!
//! # With a configuration file
//! TRADESIM_CONFIG=config.toml cargo run
//!
//! # Send a login request
//! printf '{"action":"login","username":"u","password":"p"}' | nc 127.0.0.1 8000
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod market_data;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod simulation;

pub use config::Config;
pub use error::ServerError;
pub use market_data::MarketDataGenerator;
pub use server::Server;
