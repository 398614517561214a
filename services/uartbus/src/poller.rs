//! Batch polling
//!
//! One poll cycle: discard stale input, write one read request per active
//! register (pacing each with a short delay), then read the whole answer in a
//! single `4 × N` byte read and slice it back in request order.

use std::thread;

use tracing::{debug, trace, warn};

use crate::catalog::{Catalog, RegisterDescriptor};
use crate::codec::{self, Value, SLOT_WIDTH};
use crate::error::UartBusError;
use crate::events::ReadResult;
use crate::settings::PollTiming;
use crate::transport::{Transport, TransportError};

/// Registers of one cycle, frozen when the cycle starts
#[derive(Debug, Clone, Default)]
pub struct Batch {
    registers: Vec<RegisterDescriptor>,
}

impl Batch {
    /// Snapshot the active registers; later toggles do not affect this batch
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self {
            registers: catalog.active_registers(),
        }
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn registers(&self) -> &[RegisterDescriptor] {
        &self.registers
    }

    /// Request bytes in batch order
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.registers
            .iter()
            .map(|d| codec::encode_read(d.address, d.selector))
            .collect()
    }

    pub fn response_len(&self) -> usize {
        codec::response_len(self.registers.len())
    }
}

/// Result of one cycle that did not hit a fatal error
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Full response decoded
    Values(ReadResult),
    /// Response length did not match; nothing decoded
    Skipped { expected: usize, received: usize },
    /// No active registers, nothing sent
    Empty,
}

/// Run one batch read
///
/// Only fatal transport errors are returned as `Err`; a short read becomes
/// [`CycleOutcome::Skipped`].
pub fn read_batch(
    transport: &mut dyn Transport,
    batch: &Batch,
    timing: &PollTiming,
) -> Result<CycleOutcome, TransportError> {
    if batch.is_empty() {
        return Ok(CycleOutcome::Empty);
    }

    transport.discard_input()?;

    for request in batch.requests() {
        transport.write(&request)?;
        transport.flush()?;
        if !timing.inter_request_delay.is_zero() {
            thread::sleep(timing.inter_request_delay);
        }
    }

    let expected = batch.response_len();
    match transport.read_exact(expected, timing.read_timeout) {
        Ok(raw) => {
            trace!("Batch response: {}", common::hex::encode_spaced(&raw));
            Ok(CycleOutcome::Values(decode_batch(batch, &raw)))
        },
        Err(TransportError::Timeout { expected, received }) => {
            debug!(
                "Short batch read: expected {} bytes, received {}",
                expected, received
            );
            Ok(CycleOutcome::Skipped { expected, received })
        },
        Err(e) => Err(e),
    }
}

/// Slice a full response into per-register values
///
/// A slot that fails to decode yields `unknown` for that key only.
pub fn decode_batch(batch: &Batch, raw: &[u8]) -> ReadResult {
    batch
        .registers
        .iter()
        .zip(raw.chunks(SLOT_WIDTH))
        .map(|(descriptor, slot)| {
            let value = codec::decode(slot, descriptor.value_type).unwrap_or_else(|e| {
                warn!("'{}': {}", descriptor.key, UartBusError::from(e));
                Value::Unknown
            });
            (descriptor.key.clone(), value)
        })
        .collect()
}

/// Read one register outside the batch
///
/// A short read yields `unknown`; only fatal transport errors are returned.
pub fn read_single(
    transport: &mut dyn Transport,
    descriptor: &RegisterDescriptor,
    timing: &PollTiming,
) -> Result<Value, TransportError> {
    transport.discard_input()?;
    transport.write(&codec::encode_read(descriptor.address, descriptor.selector))?;
    transport.flush()?;
    if !timing.inter_request_delay.is_zero() {
        thread::sleep(timing.inter_request_delay);
    }

    match transport.read_exact(SLOT_WIDTH, timing.read_timeout) {
        Ok(raw) => {
            trace!("Slot of '{}': {}", descriptor.key, common::hex::encode_upper(&raw));
            Ok(codec::decode(&raw, descriptor.value_type).unwrap_or(Value::Unknown))
        },
        Err(TransportError::Timeout { received, .. }) => {
            debug!(
                "Single read of '{}' came back short ({} bytes)",
                descriptor.key, received
            );
            Ok(Value::Unknown)
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::catalog::{EntityConfig, SignalConfig, SignalSpec};
    use crate::codec::ValueType;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn timing() -> PollTiming {
        PollTiming {
            read_timeout: Duration::from_millis(10),
            inter_request_delay: Duration::ZERO,
            ..PollTiming::default()
        }
    }

    fn ab_catalog() -> Catalog {
        let mut entity = EntityConfig::default();
        entity
            .signals
            .insert("A".into(), SignalSpec::new(0x00, ValueType::Uint16));
        entity
            .signals
            .insert("B".into(), SignalSpec::new(0x01, ValueType::Hex32));
        let mut config = SignalConfig::new();
        config.insert("E".into(), entity);
        Catalog::build(&config).unwrap()
    }

    #[test]
    fn test_normal_batch_read() {
        let batch = Batch::from_catalog(&ab_catalog());
        let (mut transport, handle) = MockTransport::new();
        handle.push_reply(vec![0x02, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00]);

        let outcome = read_batch(&mut transport, &batch, &timing()).unwrap();
        let CycleOutcome::Values(values) = outcome else {
            panic!("expected values, got {outcome:?}");
        };

        assert_eq!(values["E_*_A"], Value::Int(2));
        assert_eq!(values["E_*_B"].to_string(), "0xff");
        assert_eq!(
            values.keys().collect::<Vec<_>>(),
            vec!["E_*_A", "E_*_B"]
        );
        assert_eq!(handle.sent_data(), vec![vec![0x00, 0x00], vec![0x00, 0x01]]);
        assert_eq!(handle.read_requests(), vec![8]);
        assert_eq!(handle.discard_count(), 1);
    }

    #[test]
    fn test_short_batch_read_is_skipped() {
        let batch = Batch::from_catalog(&ab_catalog());
        let (mut transport, handle) = MockTransport::new();
        handle.push_reply(vec![0x02, 0x00, 0x00, 0x00]);

        let outcome = read_batch(&mut transport, &batch, &timing()).unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Skipped {
                expected: 8,
                received: 4
            }
        );
    }

    #[test]
    fn test_empty_batch_sends_nothing() {
        let mut catalog = ab_catalog();
        catalog.set_all_active(false);
        let batch = Batch::from_catalog(&catalog);
        let (mut transport, handle) = MockTransport::new();

        assert_eq!(
            read_batch(&mut transport, &batch, &timing()).unwrap(),
            CycleOutcome::Empty
        );
        assert!(handle.sent_data().is_empty());
        assert!(handle.read_requests().is_empty());
    }

    #[test]
    fn test_io_error_is_returned() {
        let batch = Batch::from_catalog(&ab_catalog());
        let (mut transport, handle) = MockTransport::new();
        handle.push_io_error("device unplugged");

        let err = read_batch(&mut transport, &batch, &timing()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_batch_is_a_snapshot() {
        let mut catalog = ab_catalog();
        let batch = Batch::from_catalog(&catalog);
        catalog.set_active("E_*_A", false);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.response_len(), 8);
        assert_eq!(Batch::from_catalog(&catalog).len(), 1);
    }

    #[test]
    fn test_requests_carry_selector() {
        let catalog = Catalog::demo().unwrap();
        let batch = Batch::from_catalog(&catalog);
        let requests = batch.requests();
        assert_eq!(requests[0], vec![0x00, 0x00, 0x00]);
        assert_eq!(requests.last().unwrap(), &vec![0x00, 0x01, 0x03]);
        assert_eq!(requests.len(), 15);
    }

    #[test]
    fn test_read_single() {
        let catalog = ab_catalog();
        let descriptor = catalog.get("E_*_B").unwrap();
        let (mut transport, handle) = MockTransport::new();
        handle.push_reply(vec![0x10, 0x00, 0x00, 0x00]);

        let value = read_single(&mut transport, descriptor, &timing()).unwrap();
        assert_eq!(value, Value::Hex(0x10));
        assert_eq!(handle.sent_data(), vec![vec![0x00, 0x01]]);

        // Silent peer
        let value = read_single(&mut transport, descriptor, &timing()).unwrap();
        assert!(value.is_unknown());
    }
}
