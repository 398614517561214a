//! Logging bootstrap for uartbus binaries
//!
//! Console output goes to stderr so the interactive prompt on stdout stays
//! readable. Lines carry the emitting thread when it is named (the session
//! workers are) and the active span scope, e.g.
//!
//! ```text
//! 2025-12-02T00:50:44.809000Z [INFO] uartbus-worker-1 session{id=1 port=/dev/ttyUSB0}: Handshake complete
//! ```
//!
//! A daily-rolling file layer is added when a log directory is configured, and
//! the filter sits behind a reload layer so the console can change it live.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields, FormattedFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Handle and textual form of the installed filter
struct FilterState {
    handle: reload::Handle<EnvFilter, Registry>,
    current: Mutex<String>,
}

static FILTER: OnceLock<FilterState> = OnceLock::new();
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter target and log file prefix
    pub service_name: String,
    /// Level for the service target when `RUST_LOG` is not set
    pub level: Level,
    /// Directory for daily log files, `None` logs to the console only
    pub log_dir: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "uartbus".to_string(),
            level: Level::INFO,
            log_dir: None,
            ansi: true,
        }
    }
}

fn level_tag(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
    }
}

/// `timestamp [LEVEL] thread span{fields}: message`
struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        let (tag, color) = level_tag(*event.metadata().level());
        if writer.has_ansi_escapes() {
            write!(writer, "{color}{tag}\x1b[0m ")?;
        } else {
            write!(writer, "{tag} ")?;
        }

        if let Some(name) = std::thread::current().name() {
            if name != "main" {
                write!(writer, "{name} ")?;
            }
        }

        if let Some(scope) = ctx.event_scope() {
            let mut spans = String::new();
            for span in scope.from_root() {
                if !spans.is_empty() {
                    spans.push(':');
                }
                spans.push_str(span.name());
                if let Some(fields) = span.extensions().get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        let _ = write!(spans, "{{{fields}}}");
                    }
                }
            }
            write!(writer, "{spans}: ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter used when `RUST_LOG` is absent
///
/// Dependencies stay at `warn`; the service target follows `level`.
pub fn default_filter(service_name: &str, level: Level) -> String {
    format!(
        "warn,{}={}",
        service_name.replace('-', "_"),
        level.as_str().to_lowercase()
    )
}

pub fn parse_level(level: &str) -> Option<Level> {
    level.trim().parse::<Level>().ok()
}

/// Install the global subscriber
///
/// `RUST_LOG` takes priority over `config.level` when it is set.
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_filter(&config.service_name, config.level));

    let (filter_layer, handle) = reload::Layer::new(EnvFilter::try_new(&filter)?);

    let file_layer = if let Some(dir) = &config.log_dir {
        fs::create_dir_all(dir)?;
        let appender =
            tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .event_format(LineFormat),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.ansi)
                .event_format(LineFormat),
        )
        .with(file_layer)
        .try_init()?;

    let _ = FILTER.set(FilterState {
        handle,
        current: Mutex::new(filter),
    });
    Ok(())
}

/// Replace the active filter
///
/// Accepts a bare level (`debug`) or a full filter directive
/// (`warn,uartbus=trace`).
pub fn set_log_level(level: &str) -> Result<(), String> {
    let state = FILTER
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    state
        .handle
        .reload(filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Ok(mut current) = state.current.lock() {
        *current = level.to_string();
    }
    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Active filter directive, `unknown` before initialization
pub fn get_log_level() -> String {
    FILTER
        .get()
        .and_then(|state| state.current.lock().ok().map(|current| current.clone()))
        .unwrap_or_else(|| "unknown".to_string())
}
