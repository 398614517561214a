//! Command-line interface of the `uartbus` console

pub mod repl;

use std::path::PathBuf;

use clap::Parser;
use uartbus::EngineSettings;

/// Poll FPGA debug registers over a UART link
#[derive(Parser, Debug, Clone)]
#[command(name = "uartbus", version, about)]
pub struct Args {
    /// Serial port path (overrides the settings file)
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Update period in seconds
    #[arg(short = 'u', long = "update-time")]
    pub update_time: Option<f64>,

    /// Signal configuration file (JSON or YAML)
    #[arg(long = "cfg")]
    pub cfg: Option<PathBuf>,

    /// Engine settings file (YAML)
    #[arg(short, long, env = "UARTBUS_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Talk to a simulated device instead of a serial port
    #[arg(long)]
    pub simulate: bool,

    /// Connect right after startup
    #[arg(short, long)]
    pub connect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write daily log files to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Args {
    /// Apply command-line overrides on top of the loaded settings
    pub fn apply(&self, settings: &mut EngineSettings) {
        if let Some(port) = &self.port {
            settings.port = port.clone();
        }
        if let Some(baud) = self.baud {
            settings.baud_rate = baud;
        }
        if let Some(seconds) = self.update_time {
            settings.update_period_ms = seconds_to_ms(seconds);
        }
        if let Some(cfg) = &self.cfg {
            settings.signals = Some(cfg.clone());
        }
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}
