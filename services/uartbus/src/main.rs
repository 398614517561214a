//! uartbus - interactive console for the UART register polling engine

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use common::logging::{self, LogConfig};
use tracing::{info, Level};
use uartbus::{Catalog, ConnectionEvent, EngineSettings, SimulatedDevice, UartBus};

use crate::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    if args.no_color {
        colored::control::set_override(false);
    }

    logging::init_with_config(LogConfig {
        level: logging::parse_level(&args.log_level).unwrap_or(Level::INFO),
        log_dir: args.log_dir.clone(),
        ansi: !args.no_color,
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let mut settings = EngineSettings::load(args.settings.as_deref())
        .context("Failed to load engine settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid engine settings")?;

    let catalog = match settings.signals.as_deref() {
        Some(path) if path.exists() => Catalog::from_file(path)
            .with_context(|| format!("Failed to load signal file {}", path.display()))?,
        Some(path) => {
            info!("Signal file {} not found, using demo configuration", path.display());
            Catalog::demo()?
        },
        None => {
            info!("No signal file configured, using demo configuration");
            Catalog::demo()?
        },
    };
    info!(
        "Catalog loaded: {} registers, {} active",
        catalog.len(),
        catalog.active_keys().len()
    );

    let engine = if args.simulate {
        info!("Using simulated device");
        let device = SimulatedDevice::from_catalog(&catalog);
        UartBus::new(&settings, catalog, Arc::new(device))
    } else {
        UartBus::serial(&settings, catalog)
    };
    let engine = Arc::new(engine);
    engine.subscribe_connection(print_connection_event);

    if args.connect {
        if let Err(e) = engine.connect() {
            eprintln!("{} {}", "Connect failed:".red(), e);
        }
    }

    let result = cli::repl::run_repl(Arc::clone(&engine));
    engine.disconnect();
    result
}

fn print_connection_event(event: &ConnectionEvent) {
    match (&event.error, event.connected) {
        (_, true) => println!("{}", "● connected".green()),
        (Some(err), false) => println!("{} {}", "● connection lost:".red(), err),
        (None, false) => println!("{}", "● disconnected".yellow()),
    }
}
