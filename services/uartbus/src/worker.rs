//! Session worker
//!
//! Runs on the dedicated thread spawned by `connect()`. Owns the transport for
//! the whole session: handshake loop first, then the poll loop, and the fatal
//! teardown path for any I/O failure along the way.

use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use crate::codec::HANDSHAKE_PROBE;
use crate::engine::Shared;
use crate::error::UartBusError;
use crate::events::ConnectionEvent;
use crate::poller::{self, Batch, CycleOutcome};
use crate::session::{StopSignal, Wake};
use crate::settings::PollTiming;
use crate::transport::{Transport, TransportError, TransportStats};

/// How the handshake loop ended without a fatal error
enum Handshake {
    Connected,
    /// Stopped by `disconnect()` or superseded
    Abandoned,
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    transport: Box<dyn Transport>,
    stop: Arc<StopSignal>,
    session_id: u64,
    timing: PollTiming,
    /// Engine transport counters at session start
    base: TransportStats,
}

impl Worker {
    pub fn new(
        shared: Arc<Shared>,
        transport: Box<dyn Transport>,
        stop: Arc<StopSignal>,
        session_id: u64,
        timing: PollTiming,
    ) -> Self {
        let base = {
            let stats = shared.stats.lock();
            TransportStats {
                bytes_sent: stats.bytes_sent,
                bytes_received: stats.bytes_received,
                writes: stats.writes,
                timeouts: stats.timeouts,
                last_activity: stats.last_activity,
            }
        };
        Self {
            shared,
            transport,
            stop,
            session_id,
            timing,
            base,
        }
    }

    pub fn run(mut self) {
        let span = info_span!("session", id = self.session_id, port = %self.transport.name());
        let _enter = span.enter();

        match self.handshake() {
            Ok(Handshake::Connected) => {
                self.shared
                    .events
                    .publish_connection(&ConnectionEvent::connected());
                self.poll_loop();
            },
            Ok(Handshake::Abandoned) => debug!("Handshake abandoned"),
            Err(e) => self.teardown(e),
        }

        self.transport.close();
        self.sync_transport_stats();
        debug!("Worker exiting");
    }

    /// Probe until the peer echoes the probe byte
    ///
    /// A missing or wrong reply is retried; only transport I/O failures and an
    /// exhausted attempt budget are errors.
    fn handshake(&mut self) -> Result<Handshake, UartBusError> {
        let mut attempts: u32 = 0;

        loop {
            if self.stop.is_stopped() {
                return Ok(Handshake::Abandoned);
            }

            attempts += 1;
            self.shared.stats.lock().handshake_attempts += 1;

            self.transport.discard_input()?;
            self.transport.write(&[HANDSHAKE_PROBE])?;
            self.transport.flush()?;

            let delay = match self.transport.read_exact(1, self.timing.read_timeout) {
                Ok(reply) if reply.as_slice() == [HANDSHAKE_PROBE] => {
                    if !self.shared.mark_connected(self.session_id) {
                        return Ok(Handshake::Abandoned);
                    }
                    info!("Handshake complete after {} attempt(s), connected", attempts);
                    return Ok(Handshake::Connected);
                },
                Ok(reply) => {
                    warn!(
                        "Handshake mismatch: expected {:02X}, got {}",
                        HANDSHAKE_PROBE,
                        common::hex::encode_spaced(&reply)
                    );
                    self.timing.handshake_mismatch_delay
                },
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    debug!("No handshake echo ({}), retrying", e);
                    self.timing.handshake_retry_delay
                },
            };

            if let Some(max) = self.timing.handshake_max_attempts {
                if attempts >= max {
                    return Err(UartBusError::HandshakeMismatch(format!(
                        "no valid reply after {attempts} attempts"
                    )));
                }
            }

            if self.stop.sleep(delay) {
                return Ok(Handshake::Abandoned);
            }
        }
    }

    fn poll_loop(&mut self) {
        loop {
            if self.stop.is_stopped() {
                return;
            }

            if let Err(e) = self.serve_pending() {
                return self.teardown(e.into());
            }

            let (batch, generation) = {
                let catalog = self.shared.catalog.read();
                (
                    Batch::from_catalog(&catalog),
                    self.shared.latest.lock().generation(),
                )
            };
            match poller::read_batch(self.transport.as_mut(), &batch, &self.timing) {
                Ok(CycleOutcome::Values(values)) => {
                    if self.stop.is_stopped() {
                        return;
                    }
                    if self.shared.latest.lock().merge(generation, &values) {
                        self.shared.stats.lock().cycles += 1;
                        self.shared.events.publish_data(&values);
                    } else {
                        debug!("Cycle dropped, catalog replaced while reading");
                    }
                },
                Ok(CycleOutcome::Skipped { expected, received }) => {
                    debug!(
                        "Cycle skipped: {}",
                        UartBusError::ShortRead { expected, received }
                    );
                    self.shared.stats.lock().short_reads += 1;
                },
                Ok(CycleOutcome::Empty) => {
                    self.shared.stats.lock().cycles += 1;
                },
                Err(e) => return self.teardown(e.into()),
            }

            self.sync_transport_stats();

            if !self.wait_period() {
                return;
            }
        }
    }

    /// Sleep one update period; a period change restarts the wait
    fn wait_period(&self) -> bool {
        loop {
            match self.stop.wait(self.shared.update_period()) {
                Wake::Elapsed => return true,
                Wake::Stopped => return false,
                Wake::Nudged => debug!("Poll timer restarted"),
            }
        }
    }

    /// Answer queued single-register reads
    fn serve_pending(&mut self) -> Result<(), TransportError> {
        for pending in self.shared.take_pending() {
            let value = poller::read_single(
                self.transport.as_mut(),
                &pending.descriptor,
                &self.timing,
            )?;
            self.shared.stats.lock().single_reads += 1;
            debug!("Single read '{}' = {}", pending.descriptor.key, value);
            // Receiver may have given up
            let _ = pending.reply.send(value);
        }
        Ok(())
    }

    /// Fatal error path: close, clear the running flag, notify once
    fn teardown(&mut self, err: UartBusError) {
        if err.is_fatal() {
            error!("Session {} failed: {}", self.session_id, err);
        } else {
            warn!("Session {} ended: {}", self.session_id, err);
        }
        self.transport.close();
        self.sync_transport_stats();

        if self.shared.fail_session(self.session_id) {
            self.shared.stats.lock().fatal_errors += 1;
            self.shared
                .events
                .publish_connection(&ConnectionEvent::failed(err.to_string()));
        }
    }

    fn sync_transport_stats(&self) {
        let transport = self.transport.stats();
        let mut stats = self.shared.stats.lock();
        stats.bytes_sent = self.base.bytes_sent + transport.bytes_sent;
        stats.bytes_received = self.base.bytes_received + transport.bytes_received;
        stats.writes = self.base.writes + transport.writes;
        stats.timeouts = self.base.timeouts + transport.timeouts;
        stats.last_activity = transport.last_activity.or(self.base.last_activity);
    }
}
