//! Transport layer
//!
//! Separates the physical byte pipe from the polling protocol. The engine only
//! ever sees `Box<dyn Transport>` handed out by a [`Connector`].
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   Worker (handshake loop / poller)       │
//! └──────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌──────────────────────────────────────────┐
//! │   Transport trait                        │
//! │   write / flush / read_exact / discard   │
//! └──────────────────────────────────────────┘
//!        │                │               │
//!        ▼                ▼               ▼
//!   ┌─────────┐   ┌──────────────┐  ┌──────────┐
//!   │ Serial  │   │  Simulated   │  │   Mock   │
//!   │  port   │   │ FPGA device  │  │ (script) │
//!   └─────────┘   └──────────────┘  └──────────┘
//! ```
//!
//! Transports never retry. Retry policy belongs to the handshake loop and
//! the poller.

pub mod mock;
pub mod serial;
pub mod simulator;
pub mod traits;

pub use mock::{MockConnector, MockHandle, MockTransport};
pub use serial::{SerialConnector, SerialTransport};
pub use simulator::SimulatedDevice;
pub use traits::{Connector, PortSettings, Transport, TransportError, TransportStats};
