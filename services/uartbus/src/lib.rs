//! UART register polling engine
//!
//! Reads internal signals of an FPGA design through a UART debug bridge. A
//! nested signal configuration is flattened into an ordered register
//! catalog; a dedicated worker thread handshakes with the peer and then
//! batch-reads every active register once per update period, publishing the
//! decoded values to subscribed sinks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌──────────────────────┐
//! │  Catalog    │───►│   UartBus   │───►│ Worker thread        │
//! │ (JSON/YAML) │    │  (engine)   │    │ handshake → poll     │
//! └─────────────┘    └─────────────┘    └──────────────────────┘
//!                           │                     │
//!                           ▼                     ▼
//!                    ┌─────────────┐    ┌──────────────────────┐
//!                    │  EventBus   │◄───│ Codec + Transport    │
//!                    │   (sinks)   │    │ (serial / simulated) │
//!                    └─────────────┘    └──────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use uartbus::{Catalog, EngineSettings, SimulatedDevice, UartBus};
//!
//! # fn main() -> uartbus::Result<()> {
//! let catalog = Catalog::demo()?;
//! let device = SimulatedDevice::from_catalog(&catalog);
//! let engine = UartBus::new(&EngineSettings::default(), catalog, Arc::new(device));
//!
//! engine.subscribe_data(|values| {
//!     for (key, value) in values {
//!         println!("{key} = {value}");
//!     }
//! });
//! engine.connect()?;
//! std::thread::sleep(std::time::Duration::from_secs(3));
//! engine.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod codec;
pub mod engine;
pub mod error;
pub mod events;
pub mod poller;
pub mod session;
pub mod settings;
pub mod transport;
pub mod values;

mod worker;

pub use catalog::{Catalog, CatalogError, GroupState, RegisterDescriptor, SignalConfig};
pub use codec::{CodecError, Value, ValueType};
pub use engine::{EngineStats, UartBus};
pub use error::{Result, UartBusError};
pub use events::{ConnectionEvent, EventBus, ReadResult, Subscription};
pub use session::ConnectionState;
pub use settings::{EngineSettings, PollTiming};
pub use transport::{
    Connector, MockConnector, MockTransport, PortSettings, SerialConnector, SimulatedDevice,
    Transport, TransportError,
};
pub use values::LatestValues;
