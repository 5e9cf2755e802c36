//! Unit tests for error module.

use super::*;

#[test]
fn test_connection_closed_error_display() {
    let error = Error::ConnectionClosed;

    let display = format!("{}", error);
    assert!(display.contains("Connection closed"));
}

#[test]
fn test_malformed_error_display() {
    let error = Error::Malformed("expected value at line 1 column 1".to_string());

    let display = format!("{}", error);
    assert!(display.contains("Malformed stream"));
    assert!(display.contains("expected value"));
}

#[test]
fn test_io_error_display() {
    let error = Error::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "refused",
    ));

    let display = format!("{}", error);
    assert!(display.contains("I/O error"));
    assert!(display.contains("refused"));
}

#[test]
fn test_json_error_debug() {
    let error = Error::from(serde_json::from_str::<u8>("x").unwrap_err());

    let debug = format!("{:?}", error);
    assert!(debug.contains("Json"));
}
