//! # Connectivity Probe
//!
//! Sole owner of [`ConnectivityState`].
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Connectivity States                                  │
//! │                                                                         │
//! │              probe fail               probe fail                        │
//! │  ┌────────┐ ───────────► ┌──────────┐ ───────────► ┌─────────┐ ─┐       │
//! │  │ ONLINE │              │ DEGRADED │              │ OFFLINE │  │ fail  │
//! │  └────────┘ ◄─────────── └──────────┘              └─────────┘ ◄┘       │
//! │     ▲  │     probe ok                                   │               │
//! │     │  │                                                │               │
//! │     │  └── N exhausted live calls ──► DEGRADED          │               │
//! │     └───────────────────── probe ok ────────────────────┘               │
//! │                                                                         │
//! │  Every change is published on a watch channel. The probe never         │
//! │  touches the queue; whoever observes a recovery decides to drain.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use unitlink_core::{ConnectivityState, Policy};

use crate::transport::Transport;

/// Reachability monitor for the backend.
pub struct ConnectivityProbe {
    transport: Arc<dyn Transport>,
    probe_timeout: Duration,
    degraded_after: u32,
    state_tx: watch::Sender<ConnectivityState>,
    /// Serializes health checks so two callers never race a transition.
    check_lock: Mutex<()>,
    live_failures: AtomicU32,
}

impl ConnectivityProbe {
    /// Creates a probe that starts in `initial` state.
    pub fn new(
        policy: &Policy,
        transport: Arc<dyn Transport>,
        initial: ConnectivityState,
    ) -> Self {
        let (state_tx, _) = watch::channel(initial);

        ConnectivityProbe {
            transport,
            probe_timeout: policy.probe_timeout(),
            degraded_after: policy.degraded_after_failures(),
            state_tx,
            check_lock: Mutex::new(()),
            live_failures: AtomicU32::new(0),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    /// Receiver that yields every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Runs one health call (bounded by the probe timeout) and applies the
    /// transition rule. Returns the resulting state.
    pub async fn check(&self) -> ConnectivityState {
        let _guard = self.check_lock.lock().await;

        let success = match timeout(self.probe_timeout, self.transport.health()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Health check failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "Health check timed out");
                false
            }
        };

        if success {
            self.live_failures.store(0, Ordering::SeqCst);
        }

        let from = self.state();
        self.transition(from.after_probe(success), "probe")
    }

    /// Records an exhausted live call.
    ///
    /// While ONLINE, `degraded_after_failures` consecutive exhaustions move
    /// the state to DEGRADED. In any other state this only counts.
    pub fn note_live_failure(&self) -> ConnectivityState {
        let failures = self.live_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.state();

        if state == ConnectivityState::Online && failures >= self.degraded_after {
            self.live_failures.store(0, Ordering::SeqCst);
            warn!(failures, "Consecutive live call failures");
            return self.transition(ConnectivityState::Degraded, "live calls");
        }

        state
    }

    /// Records a successful live call. A success is proof of reachability,
    /// so any non-ONLINE state returns to ONLINE.
    pub fn note_live_success(&self) -> ConnectivityState {
        self.live_failures.store(0, Ordering::SeqCst);
        self.transition(ConnectivityState::Online, "live call")
    }

    fn transition(&self, to: ConnectivityState, cause: &'static str) -> ConnectivityState {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == to {
                false
            } else {
                *state = to;
                true
            }
        });

        if changed {
            info!(state = %to, cause, "Connectivity changed");
        }
        to
    }
}

impl std::fmt::Debug for ConnectivityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityProbe")
            .field("state", &self.state())
            .field("probe_timeout", &self.probe_timeout)
            .field("degraded_after", &self.degraded_after)
            .finish()
    }
}
