//! Session primitives
//!
//! Connection state and the stop signal shared between the caller and the
//! worker thread of one session. The signal doubles as the worker's sleep
//! primitive so a disconnect or a poll period change wakes it immediately.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    /// No port open, no worker running
    Disconnected,
    /// Port open, waiting for the peer to echo the probe
    Handshaking,
    /// Handshake done, poll loop running
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Handshaking => "Handshaking",
            ConnectionState::Connected => "Connected",
        };
        f.write_str(name)
    }
}

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The full duration elapsed
    Elapsed,
    /// The session was stopped
    Stopped,
    /// Someone asked the worker to restart its timer
    Nudged,
}

#[derive(Debug, Default)]
struct SignalState {
    stopped: bool,
    nudges: u64,
}

/// Running flag plus wakeup channel of one session
#[derive(Debug, Default)]
pub struct StopSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the running flag and wake the worker
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Wake a waiting worker without stopping it
    pub fn nudge(&self) {
        self.state.lock().nudges += 1;
        self.cond.notify_all();
    }

    /// Wait for `duration`, returning early on stop or nudge
    pub fn wait(&self, duration: Duration) -> Wake {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock();
        let seen = state.nudges;
        loop {
            if state.stopped {
                return Wake::Stopped;
            }
            if state.nudges != seen {
                return Wake::Nudged;
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return if state.stopped {
                    Wake::Stopped
                } else {
                    Wake::Elapsed
                };
            }
        }
    }

    /// Wait for `duration`, returning early only on stop
    ///
    /// Returns `true` if the session was stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock();
        while !state.stopped {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.stopped
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_elapses() {
        let signal = StopSignal::new();
        assert_eq!(signal.wait(Duration::from_millis(5)), Wake::Elapsed);
        assert!(!signal.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let started = Instant::now();
                let wake = signal.wait(Duration::from_secs(30));
                (wake, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.stop();
        let (wake, elapsed) = waiter.join().unwrap();
        assert_eq!(wake, Wake::Stopped);
        assert!(elapsed < Duration::from_secs(5));
        assert!(signal.is_stopped());
        assert!(signal.sleep(Duration::from_secs(30)));
    }

    #[test]
    fn test_nudge_wakes_wait_but_not_sleep() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.nudge();
        assert_eq!(waiter.join().unwrap(), Wake::Nudged);

        let sleeper = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.sleep(Duration::from_millis(50)))
        };
        thread::sleep(Duration::from_millis(10));
        signal.nudge();
        assert!(!sleeper.join().unwrap());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Handshaking.to_string(), "Handshaking");
    }
}
