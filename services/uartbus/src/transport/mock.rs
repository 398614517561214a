//! Mock Transport Implementation
//!
//! Scripted transport for exercising the engine without hardware. Each
//! `read_exact` call consumes the next scripted reply; an exhausted script
//! behaves like a silent peer and times out. A [`MockHandle`] shares the state
//! so a test can keep scripting and inspecting after the transport has been
//! moved into the worker thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::traits::{Connector, PortSettings, Transport, TransportError, TransportStats};

/// One scripted answer to a `read_exact` call
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Bytes made available to the read; fewer than requested is a short read
    Bytes(Vec<u8>),
    /// The read fails with an I/O error
    Io(String),
}

type ReadHook = Box<dyn FnMut(usize) + Send>;

#[derive(Default)]
struct MockTransportState {
    open: bool,
    replies: VecDeque<MockReply>,
    /// Surplus bytes of a reply longer than the read, dropped by `discard_input`
    pending: Vec<u8>,
    sent_data: Vec<Vec<u8>>,
    read_requests: Vec<usize>,
    discards: usize,
    opens: usize,
    fail_open: Option<String>,
    fail_write: Option<String>,
    read_hook: Option<ReadHook>,
    stats: TransportStats,
}

impl std::fmt::Debug for MockTransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransportState")
            .field("open", &self.open)
            .field("replies", &self.replies.len())
            .field("sent", &self.sent_data.len())
            .finish()
    }
}

/// Test-side view of a mock transport
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockHandle {
    /// Queue bytes for a future read
    pub fn push_reply(&self, data: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .replies
            .push_back(MockReply::Bytes(data.into()));
    }

    /// Queue an I/O failure for a future read
    pub fn push_io_error(&self, message: impl Into<String>) {
        self.state
            .lock()
            .replies
            .push_back(MockReply::Io(message.into()));
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, message: impl Into<String>) {
        self.state.lock().fail_write = Some(message.into());
    }

    /// Make the next opens through [`MockConnector`] fail
    pub fn fail_open(&self, message: impl Into<String>) {
        self.state.lock().fail_open = Some(message.into());
    }

    /// Called with the requested length at the start of every read
    pub fn set_read_hook(&self, hook: impl FnMut(usize) + Send + 'static) {
        self.state.lock().read_hook = Some(Box::new(hook));
    }

    /// Every write, in order
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent_data.clone()
    }

    pub fn clear_sent_data(&self) {
        self.state.lock().sent_data.clear();
    }

    /// Requested length of every read, in order
    pub fn read_requests(&self) -> Vec<usize> {
        self.state.lock().read_requests.clone()
    }

    pub fn remaining_replies(&self) -> usize {
        self.state.lock().replies.len()
    }

    pub fn discard_count(&self) -> usize {
        self.state.lock().discards
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

/// Mock transport implementation
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    /// Create an open mock transport and its handle
    pub fn new() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        handle.state.lock().open = true;
        (Self::with_handle(&handle), handle)
    }

    fn with_handle(handle: &MockHandle) -> Self {
        Self {
            name: "mock".to_string(),
            state: Arc::clone(&handle.state),
        }
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        if let Some(message) = &state.fail_write {
            return Err(TransportError::Io(message.clone()));
        }
        state.sent_data.push(data.to_vec());
        state.stats.record_bytes_sent(data.len());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        if self.state.lock().open {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn read_exact(&mut self, len: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        // Run the hook without holding the lock so it may use the handle
        let hook = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(TransportError::NotConnected);
            }
            state.read_requests.push(len);
            state.read_hook.take()
        };
        if let Some(mut hook) = hook {
            hook(len);
            let mut state = self.state.lock();
            if state.read_hook.is_none() {
                state.read_hook = Some(hook);
            }
        }

        let mut state = self.state.lock();
        let mut available = std::mem::take(&mut state.pending);
        if available.len() < len {
            match state.replies.pop_front() {
                Some(MockReply::Bytes(bytes)) => available.extend(bytes),
                Some(MockReply::Io(message)) => return Err(TransportError::Io(message)),
                None => {},
            }
        }

        if available.len() < len {
            let received = available.len();
            state.stats.record_bytes_received(received);
            state.stats.record_timeout();
            debug!("Mock short read: expected {}, received {}", len, received);
            return Err(TransportError::Timeout {
                expected: len,
                received,
            });
        }

        state.pending = available.split_off(len);
        state.stats.record_bytes_received(len);
        Ok(available)
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        state.pending.clear();
        state.discards += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats.clone()
    }
}

/// Connector handing out mock transports that share one [`MockHandle`]
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    handle: MockHandle,
}

impl MockConnector {
    pub fn new() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl Connector for MockConnector {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, TransportError> {
        settings.validate()?;
        let mut state = self.handle.state.lock();
        if let Some(message) = &state.fail_open {
            return Err(TransportError::ConnectionFailed(format!(
                "{}: {}",
                settings.path, message
            )));
        }
        state.open = true;
        state.opens += 1;
        state.pending.clear();
        drop(state);

        Ok(Box::new(MockTransport::with_handle(&self.handle)))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_transport_send_receive() {
        let (mut transport, handle) = MockTransport::new();
        handle.push_reply(vec![0xFE]);

        transport.write(&[0xFE]).unwrap();
        assert_eq!(transport.read_exact(1, TIMEOUT).unwrap(), vec![0xFE]);
        assert_eq!(handle.sent_data(), vec![vec![0xFE]]);
        assert_eq!(handle.read_requests(), vec![1]);
    }

    #[test]
    fn test_mock_short_read_times_out() {
        let (mut transport, handle) = MockTransport::new();
        handle.push_reply(vec![0x01, 0x02]);

        let err = transport.read_exact(4, TIMEOUT).unwrap_err();
        assert_eq!(
            err,
            TransportError::Timeout {
                expected: 4,
                received: 2
            }
        );

        // Exhausted script behaves like a silent peer
        let err = transport.read_exact(1, TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { received: 0, .. }));
        assert_eq!(transport.stats().timeouts, 2);
    }

    #[test]
    fn test_mock_surplus_bytes_until_discard() {
        let (mut transport, handle) = MockTransport::new();
        handle.push_reply(vec![1, 2, 3]);

        assert_eq!(transport.read_exact(1, TIMEOUT).unwrap(), vec![1]);
        assert_eq!(transport.read_exact(1, TIMEOUT).unwrap(), vec![2]);
        transport.discard_input().unwrap();
        assert!(transport.read_exact(1, TIMEOUT).is_err());
        assert_eq!(handle.discard_count(), 1);
    }

    #[test]
    fn test_mock_io_failures() {
        let (mut transport, handle) = MockTransport::new();
        handle.push_io_error("device unplugged");
        let err = transport.read_exact(4, TIMEOUT).unwrap_err();
        assert!(err.is_fatal());

        handle.fail_writes("broken pipe");
        assert!(matches!(
            transport.write(&[0x00]),
            Err(TransportError::Io(_))
        ));

        transport.close();
        assert!(!handle.is_open());
        assert_eq!(
            transport.discard_input().unwrap_err(),
            TransportError::NotConnected
        );
    }

    #[test]
    fn test_mock_connector() {
        let (connector, handle) = MockConnector::new();
        let settings = PortSettings::new("/dev/mock", 115_200);

        let transport = connector.open(&settings).unwrap();
        assert!(transport.is_open());
        assert_eq!(handle.open_count(), 1);

        handle.fail_open("busy");
        let err = connector.open(&settings).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }
}
