//! Engine settings
//!
//! Layered with figment: built-in defaults, then an optional YAML file, then
//! `UARTBUS_*` environment variables. Command-line overrides are applied by the
//! binary on the extracted value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, UartBusError};
use crate::transport::PortSettings;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "UARTBUS_";

/// Shortest accepted poll period
pub const MIN_UPDATE_PERIOD_MS: u64 = 20;

/// Engine settings, durations in milliseconds unless named otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Serial port path
    pub port: String,
    pub baud_rate: u32,
    /// Pause between poll cycles
    pub update_period_ms: u64,
    /// Bound on every blocking read
    pub read_timeout_ms: u64,
    /// Pause after each request of a batch, paces the peer
    pub inter_request_delay_us: u64,
    /// Handshake retry pause when no byte came back
    pub handshake_retry_delay_ms: u64,
    /// Handshake retry pause when a wrong byte came back
    pub handshake_mismatch_delay_ms: u64,
    /// `None` retries forever
    pub handshake_max_attempts: Option<u32>,
    /// Signal configuration file
    pub signals: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            update_period_ms: 1000,
            read_timeout_ms: 1000,
            inter_request_delay_us: 600,
            handshake_retry_delay_ms: 500,
            handshake_mismatch_delay_ms: 1000,
            handshake_max_attempts: None,
            signals: Some(PathBuf::from("uart2bus.json")),
        }
    }
}

impl EngineSettings {
    /// Provider chain with the standard environment prefix
    pub fn figment(file: Option<&Path>) -> Figment {
        Self::figment_with_prefix(file, ENV_PREFIX)
    }

    pub fn figment_with_prefix(file: Option<&Path>, env_prefix: &str) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(env_prefix))
    }

    /// Load and validate settings
    pub fn load(file: Option<&Path>) -> Result<Self> {
        if let Some(path) = file {
            if !path.exists() {
                return Err(UartBusError::settings(format!(
                    "settings file not found: {}",
                    path.display()
                )));
            }
        }
        let settings: Self = Self::figment(file).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(UartBusError::settings("port cannot be empty"));
        }
        if self.baud_rate == 0 {
            return Err(UartBusError::settings("baud_rate must be greater than zero"));
        }
        if self.read_timeout_ms == 0 {
            return Err(UartBusError::settings(
                "read_timeout_ms must be greater than zero",
            ));
        }
        if self.handshake_max_attempts == Some(0) {
            return Err(UartBusError::settings(
                "handshake_max_attempts must be at least 1 when set",
            ));
        }
        Ok(())
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings::new(self.port.clone(), self.baud_rate)
    }

    /// Poll period after clamping
    pub fn update_period(&self) -> Duration {
        Duration::from_millis(clamp_update_period_ms(self.update_period_ms))
    }

    pub fn timing(&self) -> PollTiming {
        PollTiming {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            inter_request_delay: Duration::from_micros(self.inter_request_delay_us),
            handshake_retry_delay: Duration::from_millis(self.handshake_retry_delay_ms),
            handshake_mismatch_delay: Duration::from_millis(self.handshake_mismatch_delay_ms),
            handshake_max_attempts: self.handshake_max_attempts,
        }
    }
}

/// Raise a poll period below the floor, logging when it happens
pub fn clamp_update_period_ms(period_ms: u64) -> u64 {
    if period_ms < MIN_UPDATE_PERIOD_MS {
        info!(
            "Update period {} ms below minimum, using {} ms",
            period_ms, MIN_UPDATE_PERIOD_MS
        );
        MIN_UPDATE_PERIOD_MS
    } else {
        period_ms
    }
}

/// Fixed timing parameters of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub read_timeout: Duration,
    pub inter_request_delay: Duration,
    pub handshake_retry_delay: Duration,
    pub handshake_mismatch_delay: Duration,
    pub handshake_max_attempts: Option<u32>,
}

impl Default for PollTiming {
    fn default() -> Self {
        EngineSettings::default().timing()
    }
}
