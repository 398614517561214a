//! Serial Transport Implementation
//!
//! Blocking serial port transport on top of the `serialport` crate. The port is
//! opened 8N1 without flow control; per-call read deadlines are applied by
//! adjusting the port timeout to the remaining time before each read.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, trace};

use super::traits::{Connector, PortSettings, Transport, TransportError, TransportStats};

/// Port timeout used until the first read sets a real deadline
const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial transport implementation
pub struct SerialTransport {
    settings: PortSettings,
    port: Option<Box<dyn SerialPort>>,
    stats: TransportStats,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("settings", &self.settings)
            .field("open", &self.port.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl SerialTransport {
    /// Open the port described by `settings`
    pub fn open(settings: &PortSettings) -> Result<Self, TransportError> {
        settings.validate()?;

        info!(
            "Opening serial port: {} @ {} baud",
            settings.path, settings.baud_rate
        );

        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_PORT_TIMEOUT)
            .open()
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("{}: {}", settings.path, e))
            })?;

        Ok(Self {
            settings: settings.clone(),
            port: Some(port),
            stats: TransportStats::new(),
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.settings.path
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        port.write_all(data)?;
        trace!("TX {}", common::hex::encode_spaced(data));
        self.stats.record_bytes_sent(data.len());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port_mut()?.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut buffer = vec![0u8; len];
        let mut filled = 0usize;
        let deadline = Instant::now() + timeout;

        {
            let port = self.port_mut()?;
            while filled < len {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                port.set_timeout(remaining)
                    .map_err(|e| TransportError::Io(e.to_string()))?;

                match port.read(&mut buffer[filled..]) {
                    Ok(0) => {},
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == ErrorKind::TimedOut => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => {},
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.stats.record_bytes_received(filled);
        trace!("RX {}", common::hex::encode_spaced(&buffer[..filled]));

        if filled < len {
            self.stats.record_timeout();
            return Err(TransportError::Timeout {
                expected: len,
                received: filled,
            });
        }
        Ok(buffer)
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.port_mut()?
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port {} closed", self.settings.path);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connector that opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::open(settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_invalid_settings() {
        let err = SerialTransport::open(&PortSettings::new("", 115_200)).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn test_open_missing_port_is_connection_failure() {
        let err = SerialConnector
            .open(&PortSettings::new("/dev/uartbus-does-not-exist", 115_200))
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
        assert!(err.to_string().contains("/dev/uartbus-does-not-exist"));
    }
}
