//! # Request Dispatcher
//!
//! Turns one logical call into a result the UI can always render: live data,
//! synthetic data, or a queued write. Every result carries its provenance.
//!
//! ## Decision Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       RequestDispatcher::execute()                      │
//! │                                                                         │
//! │  cancelled? ───────────────────────────────────────► Err(Cancelled)     │
//! │  forceMockData? ───────────────────────────────────► MOCK               │
//! │                                                                         │
//! │  WRITE while OFFLINE (offline mode on)                                  │
//! │    └─► probe.check() ── still OFFLINE ─────────────► QUEUED             │
//! │                     └── recovered ──┐                                   │
//! │                                     ▼                                   │
//! │  WRITE with older writes queued                                         │
//! │    └─► drain first ── queue still not empty ───────► QUEUED (behind)    │
//! │                    └── emptied ─────┐                                   │
//! │                                     ▼                                   │
//! │  LiveCaller::call() ── ok ─────────────────────────► LIVE               │
//! │        │           └── rejected (4xx) ─────────────► Err(Rejected)      │
//! │        │                                                                │
//! │        └── Unreachable                                                  │
//! │              READ:  mock on  ──────────────────────► MOCK               │
//! │                     mock off ──────────────────────► Err(Unreachable)   │
//! │              WRITE: offline mode on ───────────────► QUEUED             │
//! │                     offline mode off ──────────────► Err(Unreachable)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A missing mock generator is surfaced as `UnsupportedProcedure` and is
//! never replaced by an empty value.
//!
//! Writes reach the backend in the order they were issued: a new write never
//! goes live while older writes are still waiting in the queue.

use std::sync::Arc;
use tracing::{debug, info, warn};

use unitlink_core::{
    ConnectivityState, Dispatched, MockDataProvider, Policy, QueueEntry, RequestDescriptor,
};

use crate::error::{LinkError, LinkResult};
use crate::live::LiveCaller;
use crate::probe::ConnectivityProbe;
use crate::queue::{DrainReport, OfflineQueue};

/// Applies the policy to every logical call.
pub struct RequestDispatcher {
    policy: Arc<Policy>,
    live: LiveCaller,
    probe: Arc<ConnectivityProbe>,
    mock: Arc<MockDataProvider>,
    queue: Arc<OfflineQueue>,
}

impl RequestDispatcher {
    pub fn new(
        policy: Arc<Policy>,
        live: LiveCaller,
        probe: Arc<ConnectivityProbe>,
        mock: Arc<MockDataProvider>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        RequestDispatcher {
            policy,
            live,
            probe,
            mock,
            queue,
        }
    }

    pub fn probe(&self) -> &Arc<ConnectivityProbe> {
        &self.probe
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Executes one logical call.
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> LinkResult<Dispatched> {
        if descriptor.is_cancelled() {
            debug!(procedure = %descriptor.procedure, "Cancelled before dispatch");
            return Err(LinkError::Cancelled(descriptor.procedure.clone()));
        }

        descriptor.validate()?;

        if self.policy.force_mock_data() {
            return self.serve_mock(descriptor);
        }

        if descriptor.is_write()
            && self.policy.enable_offline_mode()
            && self.probe.state() == ConnectivityState::Offline
        {
            let state = self.probe.check().await;
            if state == ConnectivityState::Offline {
                debug!(procedure = %descriptor.procedure, "Offline, queueing write");
                return self.queue_write(descriptor).await;
            }
        }

        if descriptor.is_write() && !self.flush_older_writes().await? {
            debug!(procedure = %descriptor.procedure, "Older writes still queued, queueing behind them");
            return self.queue_write(descriptor).await;
        }

        match self.live.call(descriptor).await {
            Ok(value) => {
                self.probe.note_live_success();
                Ok(Dispatched::live(value))
            }
            Err(e) if e.is_unreachable() => {
                self.probe.note_live_failure();
                self.fall_back(descriptor, e).await
            }
            Err(e) => {
                // The backend answered, so it is reachable.
                if matches!(e, LinkError::Rejected { .. } | LinkError::Protocol { .. }) {
                    self.probe.note_live_success();
                }
                Err(e)
            }
        }
    }

    /// Replays the offline queue through the live path.
    pub async fn drain_queue(&self) -> LinkResult<DrainReport> {
        self.queue.drain(&self.live).await
    }

    /// Drains older queued writes ahead of a new one.
    ///
    /// Returns true when nothing drainable is left, so the new write may go
    /// live. Without offline mode the write cannot wait and always goes live.
    async fn flush_older_writes(&self) -> LinkResult<bool> {
        if self.queue.pending_count().await? == 0 {
            return Ok(true);
        }
        if !self.policy.enable_offline_mode() {
            return Ok(true);
        }

        let report = self.drain_queue().await?;
        if report.already_running {
            // The running pass or the next scheduled drain delivers it
            return Ok(false);
        }
        Ok(self.queue.pending_count().await? == 0)
    }

    async fn fall_back(
        &self,
        descriptor: &RequestDescriptor,
        cause: LinkError,
    ) -> LinkResult<Dispatched> {
        if descriptor.is_write() {
            if self.policy.enable_offline_mode() {
                return self.queue_write(descriptor).await;
            }
        } else if self.policy.enable_mock_data() {
            return self.serve_mock(descriptor);
        }

        Err(cause)
    }

    fn serve_mock(&self, descriptor: &RequestDescriptor) -> LinkResult<Dispatched> {
        let value = self
            .mock
            .provide(&descriptor.procedure, &descriptor.payload)
            .map_err(|e| {
                warn!(procedure = %descriptor.procedure, "No mock data for procedure");
                LinkError::from(e)
            })?;

        info!(procedure = %descriptor.procedure, "Serving mock data");
        Ok(Dispatched::mock(value))
    }

    async fn queue_write(&self, descriptor: &RequestDescriptor) -> LinkResult<Dispatched> {
        let entry: QueueEntry = self.queue.enqueue(descriptor).await?;
        Ok(Dispatched::queued(entry.idempotency_key()))
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("state", &self.probe.state())
            .field("force_mock_data", &self.policy.force_mock_data())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
