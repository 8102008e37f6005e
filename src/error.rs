//! # Error Types
//!
//! Custom error types for CRSF Bridge using `thiserror`.

use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for CRSF Bridge
#[derive(Debug, Error)]
pub enum CrsfBridgeError {
    /// Frame checksum did not match its contents
    #[error("CRC mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    CrcMismatch { expected: u8, actual: u8 },

    /// Complete frame with an impossible sync or length field
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame could not be built because the payload does not fit the length byte
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Channel value cannot be represented (or is not plausible) on the wire
    #[error("Channel {index} value {value} out of range (max {max})")]
    ChannelOutOfRange { index: usize, value: u16, max: u16 },

    /// Datagram destination refused or could not be reached
    #[error("Destination unreachable: {0}")]
    DestinationUnreachable(SocketAddr),

    /// Byte stream reached end-of-file
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// Simulator telemetry datagram could not be decoded
    #[error("Telemetry decode error: {0}")]
    TelemetryDecode(String),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No serial device could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Telemetry stream description errors
    #[error("Telemetry description error: {0}")]
    Description(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for CRSF Bridge
pub type Result<T> = std::result::Result<T, CrsfBridgeError>;
