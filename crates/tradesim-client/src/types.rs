//! Request and message types exchanged with the server.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;


/// Request sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientCommand {
    /// Action to perform.
    pub action: String,
    /// Optional username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ClientCommand {
    /// Creates a login command.
    #[must_use]
    pub fn login(username: &str, password: &str) -> Self {
        Self {
            action: "login".to_string(),
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        }
    }

    /// Creates a command carrying only an action.
    #[must_use]
    pub fn action(action: &str) -> Self {
        Self {
            action: action.to_string(),
            username: None,
            password: None,
        }
    }
}

/// Message received from the server, keyed by its `action`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action")]
pub enum ServerMessage {
    /// Response to a login request.
    #[serde(rename = "login")]
    Login(ActionResponse),
    /// Periodic top-of-book broadcast.
    #[serde(rename = "market_data")]
    MarketData(MarketData),
}

/// Response to a dispatched request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionResponse {
    /// Numeric outcome.
    pub status: u16,
    /// Success message.
    #[serde(default)]
    pub msg: Option<String>,
    /// Failure reason.
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionResponse {
    /// Whether the request succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Market data broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarketData {
    /// Event name, always `market_data`.
    pub event: String,
    /// Top of book per symbol.
    pub data: HashMap<String, BookTop>,
    /// Snapshot time in epoch milliseconds.
    pub timestamp: i64,
}

/// Top of book for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookTop {
    /// Best bids, price descending. `None` when the side is empty.
    pub buy: Option<Vec<PriceLevel>>,
    /// Best asks, price ascending. `None` when the side is empty.
    pub sell: Option<Vec<PriceLevel>>,
}

impl BookTop {
    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.buy.as_ref().and_then(|levels| levels.first())
    }

    /// Best ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.sell.as_ref().and_then(|levels| levels.first())
    }
}

/// Price level in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PriceLevel {
    /// Price.
    pub price: i64,
    /// Resting volume.
    pub volume: u32,
}
