//! Simulated FPGA debug peer
//!
//! An in-memory stand-in for the UART debug bridge. It echoes the handshake
//! probe, decodes `0x00 [sel] addr` read requests and answers each one with a
//! 4-byte slot from its register file. Integer registers seeded from a catalog
//! run as free-running counters so a console session shows live data.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::traits::{Connector, PortSettings, Transport, TransportError, TransportStats};
use crate::catalog::Catalog;
use crate::codec::{self, Value, ValueType, HANDSHAKE_PROBE, READ_OPCODE, SLOT_WIDTH};

#[derive(Debug, Clone)]
struct Register {
    value_type: ValueType,
    value: Value,
    /// Increment applied after every read
    step: Option<i64>,
}

impl Register {
    fn slot(&self) -> [u8; SLOT_WIDTH] {
        codec::encode_slot(&self.value, self.value_type).unwrap_or([0; SLOT_WIDTH])
    }

    fn advance(&mut self) {
        if let (Some(step), Value::Int(v)) = (self.step, self.value) {
            self.value = Value::Int(wrap_int(v.wrapping_add(step), self.value_type));
        }
    }
}

fn wrap_int(v: i64, value_type: ValueType) -> i64 {
    match value_type {
        ValueType::Int8 => i64::from(v as i8),
        ValueType::Uint8 => i64::from(v as u8),
        ValueType::Int16 => i64::from(v as i16),
        ValueType::Uint16 => i64::from(v as u16),
        ValueType::Int32 => i64::from(v as i32),
        ValueType::Uint32 => i64::from(v as u32),
        _ => v,
    }
}

/// Request decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parser {
    Idle,
    AwaitSelector,
    AwaitAddress(Option<u8>),
}

#[derive(Debug)]
struct DeviceState {
    open: bool,
    uses_selector: bool,
    silent: bool,
    registers: HashMap<(Option<u8>, u8), Register>,
    parser: Parser,
    output: VecDeque<u8>,
    reads_served: u64,
    stats: TransportStats,
}

impl DeviceState {
    fn feed(&mut self, byte: u8) {
        self.parser = match self.parser {
            Parser::Idle if byte == HANDSHAKE_PROBE => {
                if !self.silent {
                    self.output.push_back(HANDSHAKE_PROBE);
                }
                Parser::Idle
            },
            Parser::Idle if byte == READ_OPCODE => {
                if self.uses_selector {
                    Parser::AwaitSelector
                } else {
                    Parser::AwaitAddress(None)
                }
            },
            Parser::Idle => {
                trace!("Simulator ignoring stray byte {:02X}", byte);
                Parser::Idle
            },
            Parser::AwaitSelector => Parser::AwaitAddress(Some(byte)),
            Parser::AwaitAddress(selector) => {
                self.answer(selector, byte);
                Parser::Idle
            },
        };
    }

    fn answer(&mut self, selector: Option<u8>, address: u8) {
        let slot = match self.registers.get_mut(&(selector, address)) {
            Some(register) => {
                let slot = register.slot();
                register.advance();
                slot
            },
            None => [0; SLOT_WIDTH],
        };
        self.output.extend(slot);
        self.reads_served += 1;
    }
}

/// In-memory FPGA debug peer
///
/// Clones share the same device, which lets one instance act as its own
/// [`Connector`].
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    name: String,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Empty device; `uses_selector` controls whether requests carry a selector byte
    pub fn new(uses_selector: bool) -> Self {
        Self {
            name: "simulator".to_string(),
            state: Arc::new(Mutex::new(DeviceState {
                open: false,
                uses_selector,
                silent: false,
                registers: HashMap::new(),
                parser: Parser::Idle,
                output: VecDeque::new(),
                reads_served: 0,
                stats: TransportStats::new(),
            })),
        }
    }

    /// Device whose register file covers every register of `catalog`
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let uses_selector = catalog.iter().any(|d| d.selector.is_some());
        let device = Self::new(uses_selector);

        for descriptor in catalog.iter() {
            let address = descriptor.address;
            let (value, step) = match descriptor.value_type {
                ValueType::Char => (Value::Char(char::from(b'A' + address % 26)), None),
                ValueType::Hex32 => (Value::Hex(u32::from(address).wrapping_mul(0x0101_0101)), None),
                ValueType::Float32 => (Value::Float(f32::from(address) * 0.5), None),
                _ => (Value::Int(0), Some(i64::from(address) + 1)),
            };
            device.insert(descriptor.selector, address, descriptor.value_type, value, step);
        }

        info!(
            "Simulated device ready: {} registers, selector {}",
            catalog.len(),
            if uses_selector { "on" } else { "off" }
        );
        device
    }

    fn insert(
        &self,
        selector: Option<u8>,
        address: u8,
        value_type: ValueType,
        value: Value,
        step: Option<i64>,
    ) {
        self.state.lock().registers.insert(
            (selector, address),
            Register {
                value_type,
                value,
                step,
            },
        );
    }

    /// Set a fixed register value
    pub fn set_register(&self, selector: Option<u8>, address: u8, value_type: ValueType, value: Value) {
        self.insert(selector, address, value_type, value, None);
    }

    /// Install a counter that advances by `step` after every read
    pub fn add_counter(&self, selector: Option<u8>, address: u8, value_type: ValueType, step: i64) {
        self.insert(selector, address, value_type, Value::Int(0), Some(step));
    }

    /// Current value of a register, `None` if not in the register file
    pub fn register_value(&self, selector: Option<u8>, address: u8) -> Option<Value> {
        self.state
            .lock()
            .registers
            .get(&(selector, address))
            .map(|r| r.value)
    }

    /// Stop answering the handshake probe
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Number of read requests answered so far
    pub fn reads_served(&self) -> u64 {
        self.state.lock().reads_served
    }
}

impl Transport for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        for &byte in data {
            state.feed(byte);
        }
        state.stats.record_bytes_sent(data.len());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn read_exact(&mut self, len: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }

        let take = len.min(state.output.len());
        let bytes: Vec<u8> = state.output.drain(..take).collect();
        state.stats.record_bytes_received(take);

        if take < len {
            state.stats.record_timeout();
            return Err(TransportError::Timeout {
                expected: len,
                received: take,
            });
        }
        Ok(bytes)
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        state.output.clear();
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
        state.output.clear();
        state.parser = Parser::Idle;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats.clone()
    }
}

impl Connector for SimulatedDevice {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, TransportError> {
        debug!("Simulated device attached as {}", settings.path);
        let mut device = self.clone();
        device.name = settings.path.clone();
        device.state.lock().open = true;
        Ok(Box::new(device))
    }
}
