//! Error types for the trade server.

use crate::config::ConfigError;

#[cfg(test)]
mod tests;

/// Server error types.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket or runtime I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Outbound payload could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
