//! Register polling engine
//!
//! Public face of the crate. Owns the catalog, the sink registry and the
//! connection state machine; the transport itself lives on the worker thread
//! of the current session and is never touched from the caller's thread.
//!
//! ```text
//!   connect()          handshake ok            disconnect() / fatal I/O
//! Disconnected ──▶ Handshaking ──────────▶ Connected ──────────▶ Disconnected
//!      ▲               │
//!      └───────────────┘ disconnect() / fatal I/O / attempts exhausted
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, GroupState, RegisterDescriptor};
use crate::codec::Value;
use crate::error::{Result, UartBusError};
use crate::events::{ConnectionEvent, EventBus, ReadResult, Subscription};
use crate::session::{ConnectionState, StopSignal};
use crate::settings::{clamp_update_period_ms, EngineSettings, PollTiming};
use crate::transport::{Connector, PortSettings, SerialConnector, TransportError};
use crate::values::LatestValues;
use crate::worker::Worker;

/// Engine counters, cumulative across sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Sessions started (successful opens)
    pub sessions: u64,
    pub connect_failures: u64,
    pub handshake_attempts: u64,
    /// Poll cycles that delivered data or had nothing to poll
    pub cycles: u64,
    /// Poll cycles skipped because the response came back short
    pub short_reads: u64,
    pub single_reads: u64,
    pub fatal_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Write calls on the transport
    pub writes: u64,
    /// Transport reads that came back short, handshake and poll alike
    pub timeouts: u64,
    /// Last byte moved in either direction
    pub last_activity: Option<SystemTime>,
}

/// Single-register read waiting for the worker
pub(crate) struct PendingRead {
    pub descriptor: RegisterDescriptor,
    pub reply: oneshot::Sender<Value>,
}

/// Bookkeeping of the current (or last) session
pub(crate) struct Session {
    pub state: ConnectionState,
    pub id: u64,
    pub stop: Option<Arc<StopSignal>>,
    pub handle: Option<JoinHandle<()>>,
}

/// State shared between the engine and its worker
///
/// Lock order: `session` before `pending`, `catalog` before `latest`.
pub(crate) struct Shared {
    pub session: Mutex<Session>,
    pub catalog: RwLock<Catalog>,
    pub update_period_ms: AtomicU64,
    pub events: EventBus,
    pub latest: Mutex<LatestValues>,
    pub stats: Mutex<EngineStats>,
    pub pending: Mutex<Vec<PendingRead>>,
}

impl Shared {
    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms.load(Ordering::Relaxed))
    }

    /// Move session `id` from Handshaking to Connected
    ///
    /// Fails when the session was stopped or replaced in the meantime.
    pub fn mark_connected(&self, id: u64) -> bool {
        let mut session = self.session.lock();
        let stopped = session.stop.as_ref().map_or(true, |s| s.is_stopped());
        if session.id != id || session.state != ConnectionState::Handshaking || stopped {
            return false;
        }
        session.state = ConnectionState::Connected;
        true
    }

    /// Fatal teardown of session `id`
    ///
    /// Returns `true` if this call performed the transition, in which case the
    /// caller must notify the connection sinks.
    pub fn fail_session(&self, id: u64) -> bool {
        let mut session = self.session.lock();
        if session.id != id || session.state == ConnectionState::Disconnected {
            return false;
        }
        session.state = ConnectionState::Disconnected;
        if let Some(stop) = session.stop.take() {
            stop.stop();
        }
        self.pending.lock().clear();
        true
    }

    pub fn take_pending(&self) -> Vec<PendingRead> {
        std::mem::take(&mut *self.pending.lock())
    }
}

/// UART register polling engine
pub struct UartBus {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    port: Mutex<PortSettings>,
    timing: PollTiming,
}

impl std::fmt::Debug for UartBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let port = self.port_settings();
        let state = self.state();
        f.debug_struct("UartBus")
            .field("port", &port)
            .field("state", &state)
            .field("timing", &self.timing)
            .finish()
    }
}

impl UartBus {
    pub fn new(settings: &EngineSettings, catalog: Catalog, connector: Arc<dyn Connector>) -> Self {
        let latest = LatestValues::for_catalog(&catalog);
        let period_ms = clamp_update_period_ms(settings.update_period_ms);

        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session {
                    state: ConnectionState::Disconnected,
                    id: 0,
                    stop: None,
                    handle: None,
                }),
                catalog: RwLock::new(catalog),
                update_period_ms: AtomicU64::new(period_ms),
                events: EventBus::new(),
                latest: Mutex::new(latest),
                stats: Mutex::new(EngineStats::default()),
                pending: Mutex::new(Vec::new()),
            }),
            connector,
            port: Mutex::new(settings.port_settings()),
            timing: settings.timing(),
        }
    }

    /// Engine talking to a real serial port
    pub fn serial(settings: &EngineSettings, catalog: Catalog) -> Self {
        Self::new(settings, catalog, Arc::new(SerialConnector))
    }

    // ========================================================================
    // Connection state machine
    // ========================================================================

    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the port and start the session worker
    ///
    /// Returns once the worker is running in Handshaking; reaching Connected is
    /// reported through the connection sinks. An open failure is reported both
    /// through the sinks and as `ConnectFailure`.
    pub fn connect(&self) -> Result<()> {
        // A worker that tore itself down is still waiting to be joined
        let stale = {
            let mut session = self.shared.session.lock();
            self.ensure_disconnected(&session)?;
            session.handle.take()
        };
        if let Some(handle) = stale {
            join_worker(handle);
        }

        let mut session = self.shared.session.lock();
        self.ensure_disconnected(&session)?;

        let port = self.port.lock().clone();
        let transport = match self.connector.open(&port) {
            Ok(transport) => transport,
            Err(e) => {
                drop(session);
                let message = match e {
                    TransportError::ConnectionFailed(msg) => msg,
                    other => other.to_string(),
                };
                error!("Failed to open {}: {}", port.path, message);
                self.shared.stats.lock().connect_failures += 1;
                self.shared
                    .events
                    .publish_connection(&ConnectionEvent::failed(message.clone()));
                return Err(UartBusError::ConnectFailure(message));
            },
        };

        session.id += 1;
        let id = session.id;
        let stop = Arc::new(StopSignal::new());
        let worker = Worker::new(
            Arc::clone(&self.shared),
            transport,
            Arc::clone(&stop),
            id,
            self.timing,
        );

        session.state = ConnectionState::Handshaking;
        match thread::Builder::new()
            .name(format!("uartbus-worker-{id}"))
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                session.stop = Some(stop);
                session.handle = Some(handle);
                self.shared.stats.lock().sessions += 1;
                info!(
                    "Port {} open @ {} baud, handshaking (session {})",
                    port.path, port.baud_rate, id
                );
                Ok(())
            },
            Err(e) => {
                session.state = ConnectionState::Disconnected;
                Err(UartBusError::transport_io(format!(
                    "failed to start worker thread: {e}"
                )))
            },
        }
    }

    fn ensure_disconnected(&self, session: &Session) -> Result<()> {
        if session.state == ConnectionState::Disconnected {
            return Ok(());
        }
        let path = self.port.lock().path.clone();
        warn!("connect() ignored: {} already open ({})", path, session.state);
        Err(UartBusError::AlreadyOpen(path))
    }

    /// Stop the session, close the port and wait for the worker
    ///
    /// Safe in any state. The connection sinks fire only if a session was
    /// actually running.
    pub fn disconnect(&self) {
        let (handle, was_open) = {
            let mut session = self.shared.session.lock();
            let was_open = session.state != ConnectionState::Disconnected;
            if was_open {
                session.state = ConnectionState::Disconnected;
                if let Some(stop) = session.stop.take() {
                    stop.stop();
                }
                self.shared.pending.lock().clear();
            }
            (session.handle.take(), was_open)
        };

        if let Some(handle) = handle {
            join_worker(handle);
        }

        if was_open {
            info!("Disconnected from {}", self.port.lock().path);
            self.shared
                .events
                .publish_connection(&ConnectionEvent::disconnected());
        } else {
            info!("Port already closed");
        }
    }

    /// Port used by the next `connect()`
    pub fn port_settings(&self) -> PortSettings {
        self.port.lock().clone()
    }

    pub fn set_port_settings(&self, settings: PortSettings) -> Result<()> {
        settings
            .validate()
            .map_err(|e| UartBusError::settings(e.to_string()))?;
        *self.port.lock() = settings;
        Ok(())
    }

    // ========================================================================
    // Timing
    // ========================================================================

    pub fn update_period(&self) -> Duration {
        self.shared.update_period()
    }

    /// Change the poll period and restart the running worker's timer
    ///
    /// Returns the period actually applied after clamping.
    pub fn set_update_period(&self, period: Duration) -> Duration {
        let requested = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        let applied = clamp_update_period_ms(requested);
        self.shared
            .update_period_ms
            .store(applied, Ordering::Relaxed);

        if let Some(stop) = &self.shared.session.lock().stop {
            stop.nudge();
        }
        debug!("Update period set to {} ms", applied);
        Duration::from_millis(applied)
    }

    pub fn timing(&self) -> PollTiming {
        self.timing
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Replace the catalog; the next cycle polls the new register set
    pub fn set_catalog(&self, catalog: Catalog) {
        info!("Catalog replaced: {} registers", catalog.len());
        let mut current = self.shared.catalog.write();
        self.shared.latest.lock().reset(&catalog);
        *current = catalog;
    }

    /// Load a signal file and make it the catalog, returns the register count
    pub fn load_signal_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let catalog = Catalog::from_file(path.as_ref())?;
        let count = catalog.len();
        self.set_catalog(catalog);
        Ok(count)
    }

    /// Run `f` against the current catalog
    pub fn with_catalog<R>(&self, f: impl FnOnce(&Catalog) -> R) -> R {
        f(&self.shared.catalog.read())
    }

    pub fn active_keys(&self) -> Vec<String> {
        self.shared.catalog.read().active_keys()
    }

    /// Toggle one register; unknown keys are ignored and return `false`
    pub fn set_active(&self, key: &str, active: bool) -> bool {
        self.shared.catalog.write().set_active(key, active)
    }

    pub fn set_entity_active(&self, entity: &str, active: bool) -> usize {
        self.shared.catalog.write().set_entity_active(entity, active)
    }

    pub fn set_all_active(&self, active: bool) {
        self.shared.catalog.write().set_all_active(active);
    }

    pub fn group_state(&self, entity: Option<&str>) -> Option<GroupState> {
        self.shared.catalog.read().group_state(entity)
    }

    // ========================================================================
    // Sinks and values
    // ========================================================================

    pub fn subscribe_data<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ReadResult) + Send + Sync + 'static,
    {
        self.shared.events.subscribe_data(callback)
    }

    pub fn subscribe_connection<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe_connection(callback)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.shared.events.unsubscribe(subscription)
    }

    /// Last known value of every register
    pub fn latest_values(&self) -> ReadResult {
        self.shared.latest.lock().snapshot()
    }

    pub fn latest_value(&self, key: &str) -> Value {
        self.shared.latest.lock().get(key)
    }

    /// Whether new values arrived since the last call
    pub fn take_dirty(&self) -> bool {
        self.shared.latest.lock().take_dirty()
    }

    /// Queue a single-register read for the worker
    ///
    /// The receiver resolves at the start of the next poll cycle, with
    /// `unknown` on a short read. It is dropped unresolved if the session ends.
    pub fn request_read(&self, key: &str) -> Result<oneshot::Receiver<Value>> {
        let session = self.shared.session.lock();
        if session.state != ConnectionState::Connected {
            return Err(UartBusError::NotConnected);
        }

        let descriptor = self
            .shared
            .catalog
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| UartBusError::config(format!("unknown register '{key}'")))?;

        let (reply, receiver) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .push(PendingRead { descriptor, reply });
        drop(session);

        debug!("Queued single read of '{}'", key);
        Ok(receiver)
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats.lock().clone()
    }
}

impl Drop for UartBus {
    fn drop(&mut self) {
        let needs_teardown = {
            let session = self.shared.session.lock();
            session.state != ConnectionState::Disconnected || session.handle.is_some()
        };
        if needs_teardown {
            self.disconnect();
        }
    }
}

/// Join a worker unless called from that worker (a sink reacting to an event)
fn join_worker(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        debug!("Not joining worker from its own thread");
        return;
    }
    if handle.join().is_err() {
        error!("Worker thread panicked");
    }
}
