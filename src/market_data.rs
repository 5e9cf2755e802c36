//! Consolidated market data snapshots across all simulated symbols.

use crate::config::{SimulationConfig, SymbolConfig};
use crate::error::ServerError;
use crate::protocol::encode;
use crate::simulation::{BookParams, BookSnapshot, OrderBook};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Action and event name of market data broadcasts.
pub const MARKET_DATA_EVENT: &str = "market_data";

/// Unsolicited market data broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketDataEvent {
    /// Always `market_data`.
    pub action: &'static str,
    /// Always `market_data`.
    pub event: &'static str,
    /// Top of book per symbol.
    pub data: BTreeMap<String, BookSnapshot>,
    /// Snapshot time in epoch milliseconds.
    pub timestamp: i64,
}

/// Owns the simulated order books and produces broadcast snapshots.
pub struct MarketDataGenerator {
    books: HashMap<String, OrderBook>,
}

impl MarketDataGenerator {
    /// Creates a generator with no symbols.
    #[must_use]
    pub fn new() -> Self {
        Self {
            books: HashMap::new(),
        }
    }

    /// Creates a generator with one book per configured symbol.
    ///
    /// # Arguments
    /// * `symbols` - Symbols to simulate.
    /// * `simulation` - Shared rebuild parameters.
    #[must_use]
    pub fn from_config(symbols: &[SymbolConfig], simulation: &SimulationConfig) -> Self {
        let params = BookParams::from(simulation);
        let mut generator = Self::new();
        for symbol in symbols {
            generator.insert(
                symbol.symbol.clone(),
                OrderBook::from_config(symbol, params.clone()),
            );
        }
        generator
    }

    /// Adds or replaces the book for `symbol`.
    pub fn insert(&mut self, symbol: impl Into<String>, book: OrderBook) {
        self.books.insert(symbol.into(), book);
    }

    /// Simulated symbols.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.books.keys().map(String::as_str)
    }

    /// Book for `symbol`, if simulated.
    #[must_use]
    pub fn book(&self, symbol: &str) -> Option<&OrderBook> {
        self.books.get(symbol)
    }

    /// Runs the retick check on every book with the same `now_ms`.
    pub fn check_ticks(&mut self, now_ms: i64) {
        for (symbol, book) in &mut self.books {
            if book.check_tick(now_ms) {
                debug!(
                    "Reticked {} around mid {}, next at {:?}",
                    symbol,
                    book.mid_price(),
                    book.next_retick_ms()
                );
            }
        }
    }

    /// Ticks every book at `now_ms` and snapshots all of them.
    pub fn snapshot_at(&mut self, now_ms: i64) -> MarketDataEvent {
        self.check_ticks(now_ms);
        let data = self
            .books
            .iter()
            .map(|(symbol, book)| (symbol.clone(), book.top_of_book()))
            .collect();
        MarketDataEvent {
            action: MARKET_DATA_EVENT,
            event: MARKET_DATA_EVENT,
            data,
            timestamp: now_ms,
        }
    }

    /// Captures the current time once and serializes a snapshot at it.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn make_market_data(&mut self) -> Result<Vec<u8>, ServerError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        encode(&self.snapshot_at(now_ms))
    }
}

impl Default for MarketDataGenerator {
    fn default() -> Self {
        Self::from_config(
            &crate::config::Config::default().symbols,
            &SimulationConfig::default(),
        )
    }
}
