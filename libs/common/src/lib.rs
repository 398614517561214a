//! Shared infrastructure for uartbus binaries
//!
//! Provides basic functions shared by the service crates:
//! - logging bootstrap with runtime level changes
//! - hex formatting for raw traffic dumps

pub mod hex;
pub mod logging;

pub use logging::{get_log_level, set_log_level, LogConfig};
