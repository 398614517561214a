//! Error handling for the register polling engine
//!
//! Component errors (`CatalogError`, `CodecError`, `TransportError`) live next
//! to their components; this module holds the engine-level taxonomy every
//! public operation reports through.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::codec::CodecError;
use crate::transport::TransportError;

/// Engine error type
#[derive(Error, Debug, Clone)]
pub enum UartBusError {
    /// Malformed or duplicate signal configuration, fatal to that load only
    #[error("Configuration error: {0}")]
    Config(String),

    /// The serial port could not be opened
    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    /// `connect()` called while a session is already running
    #[error("Port already open ({0})")]
    AlreadyOpen(String),

    /// An operation needed a Connected session
    #[error("Not connected")]
    NotConnected,

    /// Peer answered the probe incorrectly or not at all
    #[error("Handshake mismatch: {0}")]
    HandshakeMismatch(String),

    /// Read/write failure on the link, always fatal to the session
    #[error("Transport I/O error: {0}")]
    TransportIo(String),

    /// Fewer bytes than requested arrived before the read timeout
    #[error("Short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    /// Response slot could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Engine settings failed to load or validate
    #[error("Settings error: {0}")]
    Settings(String),
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, UartBusError>;

impl UartBusError {
    pub fn config(msg: impl Into<String>) -> Self {
        UartBusError::Config(msg.into())
    }

    pub fn transport_io(msg: impl Into<String>) -> Self {
        UartBusError::TransportIo(msg.into())
    }

    pub fn settings(msg: impl Into<String>) -> Self {
        UartBusError::Settings(msg.into())
    }

    /// Whether this error ends the session it occurred in
    pub fn is_fatal(&self) -> bool {
        matches!(self, UartBusError::TransportIo(_))
    }
}

// ============================================================================
// From implementations for component error types
// ============================================================================

impl From<CatalogError> for UartBusError {
    fn from(err: CatalogError) -> Self {
        UartBusError::Config(err.to_string())
    }
}

impl From<CodecError> for UartBusError {
    fn from(err: CodecError) -> Self {
        UartBusError::Decode(err.to_string())
    }
}

impl From<TransportError> for UartBusError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionFailed(msg) => UartBusError::ConnectFailure(msg),
            TransportError::Timeout { expected, received } => {
                UartBusError::ShortRead { expected, received }
            },
            TransportError::Io(msg) => UartBusError::TransportIo(msg),
            other => UartBusError::TransportIo(other.to_string()),
        }
    }
}

impl From<figment::Error> for UartBusError {
    fn from(err: figment::Error) -> Self {
        UartBusError::Settings(err.to_string())
    }
}
