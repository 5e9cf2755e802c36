//! Unit tests for error module.

use super::*;
use std::io;

// ============================================================================
// ServerError Display Tests
// ============================================================================

#[test]
fn test_server_error_io_display() {
    let error = ServerError::from(io::Error::new(io::ErrorKind::AddrInUse, "port taken"));
    assert_eq!(format!("{}", error), "I/O error: port taken");
}

#[test]
fn test_server_error_config_display() {
    let error = ServerError::from(ConfigError::InvalidValue("bad port".to_string()));
    assert_eq!(
        format!("{}", error),
        "Configuration error: invalid config value: bad port"
    );
}

#[test]
fn test_server_error_encode_display() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error = ServerError::from(json_err);
    assert!(format!("{}", error).starts_with("Encode error:"));
}

// ============================================================================
// Conversion Tests
// ============================================================================

#[test]
fn test_server_error_from_io_preserves_kind() {
    let error: ServerError = io::Error::from(io::ErrorKind::ConnectionReset).into();
    match error {
        ServerError::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("unexpected variant: {:?}", other),
    }
}

#[test]
fn test_server_error_debug() {
    let error = ServerError::Config(ConfigError::InvalidValue("x".to_string()));
    let debug = format!("{:?}", error);
    assert!(debug.contains("Config"));
    assert!(debug.contains("InvalidValue"));
}
