//! Configuration module for loading and parsing TOML configuration files.

use crate::simulation::MAX_MID_PRICE;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Order book simulation configuration.
    pub simulation: SimulationConfig,
    /// Simulated symbols.
    pub symbols: Vec<SymbolConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            simulation: SimulationConfig::default(),
            symbols: default_symbols(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to. Must be a loopback address.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// Market data broadcast period in milliseconds.
    pub tick_interval_ms: u64,
    /// Upper bound on a connection's unparsed inbound bytes.
    pub max_read_buffer_bytes: usize,
    /// Size of a single socket read.
    pub read_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            tick_interval_ms: 250,
            max_read_buffer_bytes: 1024 * 1024,
            read_chunk_bytes: 4096,
        }
    }
}

impl ServerConfig {
    /// Resolves the configured host and port into a socket address.
    ///
    /// # Errors
    /// Returns error if the host is not an IP literal or not a loopback address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("host {} is not an IP", self.host)))?;
        if !ip.is_loopback() {
            return Err(ConfigError::InvalidValue(format!(
                "host {} is not a loopback address",
                self.host
            )));
        }
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Market data broadcast period.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Order book simulation configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Whether market data is generated and broadcast.
    pub enabled: bool,
    /// Lower bound of the retick interval in milliseconds.
    pub retick_min_ms: u64,
    /// Upper bound of the retick interval in milliseconds.
    pub retick_max_ms: u64,
    /// Price levels generated per side on each rebuild.
    pub levels: u32,
    /// Levels per side reported in a snapshot.
    pub snapshot_depth: usize,
    /// Exponential volume decay per level of depth.
    pub depth_decay: f64,
    /// Maximum relative bid/ask volume tilt.
    pub tilt: f64,
    /// Volume multiplier for prices that are a multiple of 5.
    pub round_multiplier: f64,
    /// Maximum absolute mid price step per rebuild.
    pub max_step: i64,
    /// Maximum spread in ticks between best bid and best ask.
    pub max_tick: i64,
    /// Probability that a level is left empty.
    pub gap_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retick_min_ms: 2000,
            retick_max_ms: 5000,
            levels: 20,
            snapshot_depth: 5,
            depth_decay: 0.15,
            tilt: 0.2,
            round_multiplier: 2.0,
            max_step: 5,
            max_tick: 5,
            gap_probability: 0.33,
        }
    }
}

/// Simulated symbol configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SymbolConfig {
    /// Symbol name as it appears in market data.
    pub symbol: String,
    /// Initial mid price.
    pub mid_price: i64,
    /// Volume scale of the simulated book.
    pub max_volume: u32,
}

fn default_symbols() -> Vec<SymbolConfig> {
    vec![SymbolConfig {
        symbol: "A".to_string(),
        mid_price: 100,
        max_volume: 50,
    }]
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Arguments
    /// * `content` - TOML content as string.
    ///
    /// # Errors
    /// Returns error if content cannot be parsed or validated.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.server.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "server tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.server.read_chunk_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "server read_chunk_bytes must be positive".to_string(),
            ));
        }
        if self.server.max_read_buffer_bytes < self.server.read_chunk_bytes {
            return Err(ConfigError::InvalidValue(
                "server max_read_buffer_bytes must be at least read_chunk_bytes".to_string(),
            ));
        }

        let sim = &self.simulation;
        if sim.retick_min_ms > sim.retick_max_ms {
            return Err(ConfigError::InvalidValue(
                "simulation retick_min_ms must not exceed retick_max_ms".to_string(),
            ));
        }
        if sim.levels == 0 || sim.snapshot_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "simulation levels and snapshot_depth must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&sim.tilt) {
            return Err(ConfigError::InvalidValue(
                "simulation tilt must be in [0, 1)".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&sim.gap_probability) {
            return Err(ConfigError::InvalidValue(
                "simulation gap_probability must be in [0, 1)".to_string(),
            ));
        }
        if sim.depth_decay < 0.0 || sim.round_multiplier <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "simulation depth_decay must be non-negative and round_multiplier positive"
                    .to_string(),
            ));
        }
        if sim.max_step < 0 || sim.max_tick < 1 {
            return Err(ConfigError::InvalidValue(
                "simulation max_step must be non-negative and max_tick at least 1".to_string(),
            ));
        }
        if sim.max_step > MAX_MID_PRICE || sim.max_tick > MAX_MID_PRICE {
            return Err(ConfigError::InvalidValue(format!(
                "simulation max_step and max_tick must not exceed {}",
                MAX_MID_PRICE
            )));
        }

        if self.symbols.is_empty() {
            return Err(ConfigError::InvalidValue(
                "at least one symbol must be configured".to_string(),
            ));
        }
        for symbol in &self.symbols {
            if symbol.symbol.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "symbol name cannot be empty".to_string(),
                ));
            }
            if !(1..=MAX_MID_PRICE).contains(&symbol.mid_price) {
                return Err(ConfigError::InvalidValue(format!(
                    "symbol {} mid_price must be between 1 and {}",
                    symbol.symbol, MAX_MID_PRICE
                )));
            }
            if symbol.max_volume == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "symbol {} max_volume must be positive",
                    symbol.symbol
                )));
            }
        }

        Ok(())
    }
}
