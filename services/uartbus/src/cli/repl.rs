//! Interactive console
//!
//! Line-oriented front end for the engine: connection control, register
//! toggles, live value display and runtime log level changes.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use colored::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};
use tokio::sync::oneshot::error::TryRecvError;
use uartbus::{ConnectionState, GroupState, PortSettings, UartBus, Value};

const COMMANDS: [&str; 14] = [
    "CONNECT",
    "DISCONNECT",
    "STATUS",
    "SHOW",
    "ON",
    "OFF",
    "PERIOD",
    "LOAD",
    "READ",
    "DUMP",
    "LOG",
    "HELP",
    "QUIT",
    "EXIT",
];

/// What ON/OFF applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Key(String),
    Entity(String),
}

/// One parsed console command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect {
        port: Option<String>,
        baud: Option<u32>,
    },
    Disconnect,
    Status,
    Show(Option<String>),
    Toggle { target: String, active: bool },
    Period(u64),
    Load(PathBuf),
    Read(String),
    Dump,
    Log(Option<String>),
    Help,
    Quit,
}

/// Parse one input line
///
/// Register keys contain spaces, so commands taking a key use the rest of the
/// line as their argument.
pub fn parse_command(input: &str) -> Result<Command> {
    let input = input.trim();
    let (cmd, rest) = match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (input, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let command = match cmd.to_uppercase().as_str() {
        "CONNECT" => {
            let mut parts = rest.split_whitespace();
            let port = parts.next().map(str::to_string);
            let baud = parts
                .next()
                .map(|b| b.parse::<u32>().context("Invalid baud rate"))
                .transpose()?;
            Command::Connect { port, baud }
        },
        "DISCONNECT" => Command::Disconnect,
        "STATUS" => Command::Status,
        "SHOW" => Command::Show(arg),
        "ON" | "OFF" => {
            let Some(target) = arg else {
                bail!("Usage: {} <key|entity|all>", cmd.to_uppercase());
            };
            Command::Toggle {
                target,
                active: cmd.eq_ignore_ascii_case("ON"),
            }
        },
        "PERIOD" => {
            let Some(ms) = arg else {
                bail!("Usage: PERIOD <ms>");
            };
            Command::Period(ms.parse().context("Period must be a number of milliseconds")?)
        },
        "LOAD" => match arg {
            Some(path) => Command::Load(PathBuf::from(path)),
            None => bail!("Usage: LOAD <file>"),
        },
        "READ" => match arg {
            Some(key) => Command::Read(key),
            None => bail!("Usage: READ <key>"),
        },
        "DUMP" => Command::Dump,
        "LOG" => Command::Log(arg),
        "HELP" | "?" => Command::Help,
        "QUIT" | "EXIT" => Command::Quit,
        other => bail!("Unknown command '{}'. Type HELP for a list.", other),
    };
    Ok(command)
}

/// Resolve an ON/OFF argument against the current catalog
pub fn resolve_target(engine: &UartBus, target: &str) -> Option<Target> {
    if target.eq_ignore_ascii_case("all") {
        return Some(Target::All);
    }
    engine.with_catalog(|catalog| {
        if catalog.contains(target) {
            Some(Target::Key(target.to_string()))
        } else if catalog.iter().any(|d| d.entity == target) {
            Some(Target::Entity(target.to_string()))
        } else {
            None
        }
    })
}

struct ReplHelper {
    engine: Arc<UartBus>,
}

impl Helper for ReplHelper {}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for ReplHelper {}

impl Validator for ReplHelper {}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];

        let Some((cmd, partial)) = line.split_once(' ') else {
            let prefix = line.to_uppercase();
            let matches = COMMANDS
                .iter()
                .filter(|c| c.starts_with(&prefix))
                .map(|c| Pair {
                    display: c.to_string(),
                    replacement: format!("{c} "),
                })
                .collect();
            return Ok((0, matches));
        };

        if !matches!(cmd.to_uppercase().as_str(), "ON" | "OFF" | "READ" | "SHOW") {
            return Ok((pos, vec![]));
        }

        let start = cmd.len() + 1;
        let candidates = self.engine.with_catalog(|catalog| {
            let mut names: Vec<String> = catalog
                .entities()
                .iter()
                .map(|e| e.name.to_string())
                .collect();
            names.extend(catalog.keys().map(str::to_string));
            names
        });
        let matches = candidates
            .into_iter()
            .filter(|name| name.starts_with(partial))
            .map(|name| Pair {
                display: name.clone(),
                replacement: name,
            })
            .collect();
        Ok((start, matches))
    }
}

/// Run the interactive loop until QUIT or end of input
pub fn run_repl(engine: Arc<UartBus>) -> Result<()> {
    let config = rustyline::Config::builder()
        .completion_type(rustyline::CompletionType::List)
        .build();
    let mut rl: Editor<ReplHelper, DefaultHistory> =
        Editor::with_config(config).context("Failed to initialize readline")?;
    rl.set_helper(Some(ReplHelper {
        engine: Arc::clone(&engine),
    }));

    println!("{}", "UART debug register console".bright_cyan().bold());
    println!(
        "Type '{}' for commands, {} for completion\n",
        "help".bright_yellow(),
        "Tab".bright_cyan()
    );

    loop {
        match rl.readline("uartbus> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                let outcome = parse_command(line).and_then(|cmd| execute(&engine, cmd));
                match outcome {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => eprintln!("{} {}", "Error:".red(), e),
                }
            },
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            },
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {}", "Readline error:".red(), e);
                break;
            },
        }
    }

    println!("Bye!");
    Ok(())
}

/// Execute one command; `Ok(false)` ends the session
pub fn execute(engine: &UartBus, command: Command) -> Result<bool> {
    match command {
        Command::Connect { port, baud } => {
            if port.is_some() || baud.is_some() {
                let current = engine.port_settings();
                let settings = PortSettings::new(
                    port.unwrap_or(current.path),
                    baud.unwrap_or(current.baud_rate),
                );
                engine.set_port_settings(settings)?;
            }
            engine.connect()?;
            println!("Handshaking with {} ...", engine.port_settings().path.bright_white());
        },
        Command::Disconnect => engine.disconnect(),
        Command::Status => print_status(engine),
        Command::Show(entity) => print_catalog(engine, entity.as_deref())?,
        Command::Toggle { target, active } => {
            let word = if active { "on" } else { "off" };
            match resolve_target(engine, &target) {
                Some(Target::All) => {
                    engine.set_all_active(active);
                    println!("All registers {word}");
                },
                Some(Target::Key(key)) => {
                    engine.set_active(&key, active);
                    println!("{key} {word}");
                },
                Some(Target::Entity(entity)) => {
                    let count = engine.set_entity_active(&entity, active);
                    println!("{entity}: {count} registers {word}");
                },
                None => bail!("No register or entity named '{}'", target),
            }
        },
        Command::Period(ms) => {
            let applied = engine.set_update_period(Duration::from_millis(ms));
            println!("Update period {} ms", applied.as_millis());
        },
        Command::Load(path) => {
            let count = engine
                .load_signal_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            println!("Loaded {} registers from {}", count, path.display());
        },
        Command::Read(key) => {
            let value = read_now(engine, &key)?;
            println!("{} = {}", key, format_value(&value));
        },
        Command::Dump => {
            let json = serde_json::to_string_pretty(&engine.latest_values())?;
            println!("{json}");
        },
        Command::Log(None) => println!("Log level: {}", common::get_log_level()),
        Command::Log(Some(level)) => {
            common::set_log_level(&level).map_err(anyhow::Error::msg)?;
            println!("Log level set to {}", level.to_lowercase());
        },
        Command::Help => print_help(),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

/// Queue a single read and wait for the worker to serve it
fn read_now(engine: &UartBus, key: &str) -> Result<Value> {
    let mut receiver = engine.request_read(key)?;
    let deadline = Instant::now()
        + engine.update_period()
        + engine.timing().read_timeout * 2
        + Duration::from_secs(1);

    loop {
        match receiver.try_recv() {
            Ok(value) => return Ok(value),
            Err(TryRecvError::Closed) => bail!("Session ended before the read was served"),
            Err(TryRecvError::Empty) if Instant::now() >= deadline => {
                bail!("Timed out waiting for the read")
            },
            Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(10)),
        }
    }
}

fn format_value(value: &Value) -> ColoredString {
    match value {
        Value::Unknown => "unknown".dimmed(),
        other => other.to_string().bright_green(),
    }
}

fn state_label(state: ConnectionState) -> ColoredString {
    match state {
        ConnectionState::Connected => "Connected".green().bold(),
        ConnectionState::Handshaking => "Handshaking".yellow(),
        ConnectionState::Disconnected => "Disconnected".red(),
    }
}

fn group_mark(state: Option<GroupState>) -> &'static str {
    match state {
        Some(GroupState::Checked) => "[x]",
        Some(GroupState::Partial) => "[-]",
        Some(GroupState::Unchecked) | None => "[ ]",
    }
}

fn print_status(engine: &UartBus) {
    let port = engine.port_settings();
    let stats = engine.stats();
    let (registers, active) =
        engine.with_catalog(|c| (c.len(), c.active_keys().len()));

    println!("{}", "Status".bright_cyan().bold());
    println!("  State:      {}", state_label(engine.state()));
    println!("  Port:       {} @ {} baud", port.path, port.baud_rate);
    println!("  Period:     {} ms", engine.update_period().as_millis());
    println!("  Registers:  {} ({} active)", registers, active);
    println!(
        "  Cycles:     {} ok, {} short",
        stats.cycles, stats.short_reads
    );
    println!(
        "  Handshake:  {} attempts, {} sessions, {} connect failures",
        stats.handshake_attempts, stats.sessions, stats.connect_failures
    );
    println!(
        "  Traffic:    {} B sent in {} writes, {} B received, {} timeouts",
        stats.bytes_sent, stats.writes, stats.bytes_received, stats.timeouts
    );
    let idle = stats
        .last_activity
        .and_then(|at| at.elapsed().ok())
        .map(|elapsed| format!("{} ms ago", elapsed.as_millis()))
        .unwrap_or_else(|| "never".to_string());
    println!("  Activity:   {}, {} fatal errors", idle, stats.fatal_errors);
}

fn print_catalog(engine: &UartBus, only: Option<&str>) -> Result<()> {
    let latest = engine.latest_values();
    let printed = engine.with_catalog(|catalog| {
        let mut printed = 0;
        for entity in catalog.entities() {
            if only.is_some_and(|name| name != entity.name) {
                continue;
            }
            printed += 1;

            let selector = entity
                .selector
                .map(|s| format!("sel 0x{s:02X}"))
                .unwrap_or_else(|| "no sel".to_string());
            println!(
                "{} {} ({})",
                group_mark(catalog.group_state(Some(entity.name))),
                entity.name.bright_white().bold(),
                selector.dimmed()
            );

            for register in &entity.registers {
                let value = latest.get(&register.key).copied().unwrap_or_default();
                println!(
                    "    {} {:<20} 0x{:02X}  {:<8} {}",
                    if register.active { "[x]" } else { "[ ]" },
                    register.signal,
                    register.address,
                    register.value_type,
                    format_value(&value)
                );
            }
        }
        printed
    });

    if printed == 0 {
        if let Some(name) = only {
            bail!("No entity named '{}'", name);
        }
        println!("(catalog is empty)");
    }
    Ok(())
}

fn print_help() {
    println!("{}", "Commands".bright_cyan().bold());
    let rows = [
        ("CONNECT [port] [baud]", "Open the port and start polling"),
        ("DISCONNECT", "Stop polling and close the port"),
        ("STATUS", "Connection state and counters"),
        ("SHOW [entity]", "Register tree with latest values"),
        ("ON <key|entity|all>", "Include registers in the poll batch"),
        ("OFF <key|entity|all>", "Exclude registers from the poll batch"),
        ("PERIOD <ms>", "Change the update period (min 20 ms)"),
        ("LOAD <file>", "Replace the signal configuration"),
        ("READ <key>", "Read one register now"),
        ("DUMP", "Latest values as JSON"),
        ("LOG [level]", "Show or change the log level"),
        ("HELP", "This list"),
        ("QUIT", "Disconnect and exit"),
    ];
    for (usage, text) in rows {
        println!("  {:<24} {}", usage.bright_yellow(), text);
    }
}
