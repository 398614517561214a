//! Transport Layer Traits
//!
//! Core trait and types shared by every byte transport. All calls are
//! blocking; reads are bounded by an explicit timeout.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Port could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Read or write failure on an open port
    #[error("IO error: {0}")]
    Io(String),

    /// Fewer bytes than requested arrived before the deadline
    #[error("Read timed out: expected {expected} bytes, received {received}")]
    Timeout { expected: usize, received: usize },

    /// Operation on a closed transport
    #[error("Transport not open")]
    NotConnected,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether the link should be considered dead
    ///
    /// A timeout only means the peer was slow or silent.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Timeout { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportStats {
    /// Total bytes written
    pub bytes_sent: u64,
    /// Total bytes read
    pub bytes_received: u64,
    /// Number of write calls
    pub writes: u64,
    /// Number of read calls that came back short
    pub timeouts: u64,
    /// Time of the last successful read or write
    pub last_activity: Option<SystemTime>,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bytes_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.writes += 1;
        self.last_activity = Some(SystemTime::now());
    }

    pub fn record_bytes_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        if bytes > 0 {
            self.last_activity = Some(SystemTime::now());
        }
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }
}

/// Physical port parameters, 8N1 without flow control is implied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub path: String,
    pub baud_rate: u32,
}

impl PortSettings {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.path.trim().is_empty() {
            return Err(TransportError::Config(
                "Port path cannot be empty".to_string(),
            ));
        }

        if self.baud_rate == 0 {
            return Err(TransportError::Config(
                "Baud rate must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// A blocking, exclusively owned byte pipe
pub trait Transport: Send + fmt::Debug {
    /// Human-readable name (port path or simulator id)
    fn name(&self) -> &str;

    /// Write all bytes, best-effort without timeout
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    /// Read exactly `len` bytes within `timeout`
    ///
    /// A short read returns [`TransportError::Timeout`] carrying the number of
    /// bytes that did arrive; those bytes are consumed.
    fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Drop any unread input
    fn discard_input(&mut self) -> Result<(), TransportError>;

    /// Close the port; further calls fail with `NotConnected`
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

/// Opens transports for the engine
pub trait Connector: Send + Sync {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, TransportError>;
}
