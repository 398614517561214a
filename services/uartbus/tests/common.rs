//! Shared helpers for engine integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use uartbus::catalog::{EntityConfig, SignalSpec};
use uartbus::codec::encode_slot;
use uartbus::{
    Catalog, ConnectionEvent, EngineSettings, MockConnector, ReadResult, SignalConfig, UartBus,
    Value, ValueType,
};
use uartbus::transport::MockHandle;

pub const KEY_A: &str = "E_*_A";
pub const KEY_B: &str = "E_*_B";

/// Settings with millisecond-scale timings
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        port: "mock0".to_string(),
        baud_rate: 115_200,
        update_period_ms: 20,
        read_timeout_ms: 10,
        inter_request_delay_us: 0,
        handshake_retry_delay_ms: 1,
        handshake_mismatch_delay_ms: 1,
        handshake_max_attempts: None,
        signals: None,
    }
}

/// One entity `E` without selector: A = uint16 @ 0x00, B = hex32 @ 0x01
pub fn two_register_catalog() -> Catalog {
    let mut entity = EntityConfig::default();
    entity
        .signals
        .insert("A".into(), SignalSpec::new(0x00, ValueType::Uint16));
    entity
        .signals
        .insert("B".into(), SignalSpec::new(0x01, ValueType::Hex32));

    let mut config: SignalConfig = IndexMap::new();
    config.insert("E".into(), entity);
    Catalog::build(&config).unwrap()
}

/// Response bytes for A = 2, B = 0xff
pub fn reply_a2_bff() -> Vec<u8> {
    let mut bytes = encode_slot(&Value::Int(2), ValueType::Uint16).unwrap().to_vec();
    bytes.extend(encode_slot(&Value::Hex(0xff), ValueType::Hex32).unwrap());
    bytes
}

pub fn mock_engine(settings: &EngineSettings, catalog: Catalog) -> (Arc<UartBus>, MockHandle) {
    let (connector, handle) = MockConnector::new();
    let engine = UartBus::new(settings, catalog, Arc::new(connector));
    (Arc::new(engine), handle)
}

/// Records everything delivered to the data and connection sinks
#[derive(Clone, Default)]
pub struct Recorder {
    pub data: Arc<Mutex<Vec<ReadResult>>>,
    pub connection: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl Recorder {
    pub fn attach(engine: &UartBus) -> Self {
        let recorder = Self::default();

        let data = Arc::clone(&recorder.data);
        engine.subscribe_data(move |values| data.lock().push(values.clone()));

        let connection = Arc::clone(&recorder.connection);
        engine.subscribe_connection(move |event| connection.lock().push(event.clone()));

        recorder
    }

    pub fn data(&self) -> Vec<ReadResult> {
        self.data.lock().clone()
    }

    pub fn connection(&self) -> Vec<ConnectionEvent> {
        self.connection.lock().clone()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(3);
