//! # Backend Link
//!
//! Main orchestrator of the connectivity layer. Wires the probe, the live
//! caller, the mock provider and the offline queue together and runs the
//! background loop that drains the queue when connectivity returns.
//!
//! ## Link Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        BackendLink Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    BackendLinkHandle (Clone)                     │  │
//! │  │                                                                  │  │
//! │  │  execute • connectivity_state • list_pending_writes • status     │  │
//! │  │  drain_now • discard_pending • retry_failed • shutdown           │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │RequestDispatcher│ │ConnectivityProbe│ │   OfflineQueue         │    │
//! │  │ live → mock    │  │ watch channel  │  │   (SQLite)             │    │
//! │  │      → queue   │  │                │  │                        │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │ state changes                           │
//! │                              ▼                                          │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  background loop (one task, tokio::select!)                      │  │
//! │  │    interval tick   → probe.check(); drain if ONLINE + pending    │  │
//! │  │    state changed   → emit; drain on OFFLINE/DEGRADED → ONLINE    │  │
//! │  │    shutdown        → exit                                        │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  EVENTS (to the client):                                               │
//! │  ───────────────────────                                               │
//! │  emit_state  - ONLINE / DEGRADED / OFFLINE                             │
//! │  emit_drain  - { replayed, failed_permanent, remaining }               │
//! │  emit_error  - { message, retryable }                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use unitlink_core::{
    ConnectivityState, Dispatched, MockDataProvider, Policy, QueueEntry, RequestDescriptor,
};
use unitlink_db::{Database, DbConfig, DbError};

use crate::config::LinkConfig;
use crate::dispatcher::RequestDispatcher;
use crate::error::{LinkError, LinkResult};
use crate::live::LiveCaller;
use crate::probe::ConnectivityProbe;
use crate::queue::{DrainReport, OfflineQueue};
use crate::transport::{HttpTransport, Transport};

// =============================================================================
// Link Status
// =============================================================================

/// Snapshot of the link for diagnostics and status screens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub state: ConnectivityState,

    /// Writes a drain would still replay.
    pub pending: u64,

    /// Writes that reached the drain attempt ceiling.
    pub failed_permanent: u64,

    pub draining: bool,

    /// The queue database answers queries.
    pub storage_ok: bool,

    pub base_url: String,

    pub force_mock_data: bool,

    /// End of the last drain pass that did something.
    pub last_drain_at: Option<DateTime<Utc>>,

    /// Last error surfaced to a caller or hit in the background.
    pub last_error: Option<String>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives link events (implemented by the client bridge).
pub trait LinkEventEmitter: Send + Sync {
    /// Connectivity state changed.
    fn emit_state(&self, state: ConnectivityState);

    /// A drain pass finished.
    fn emit_drain(&self, report: &DrainReport);

    /// Something failed in the background.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl LinkEventEmitter for NoOpEmitter {
    fn emit_state(&self, _state: ConnectivityState) {}
    fn emit_drain(&self, _report: &DrainReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Default)]
struct Activity {
    last_drain_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// State shared by the handle and the background loop.
struct LinkShared {
    policy: Arc<Policy>,
    db: Arc<Database>,
    dispatcher: RequestDispatcher,
    emitter: Arc<dyn LinkEventEmitter>,
    activity: RwLock<Activity>,
    closed: AtomicBool,
}

impl LinkShared {
    fn probe(&self) -> &Arc<ConnectivityProbe> {
        self.dispatcher.probe()
    }

    fn queue(&self) -> &Arc<OfflineQueue> {
        self.dispatcher.queue()
    }

    fn ensure_open(&self) -> LinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(LinkError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    async fn record_error(&self, err: &LinkError) {
        self.activity.write().await.last_error = Some(err.to_string());
    }

    /// Runs a drain pass and reports it.
    async fn drain(&self, trigger: &'static str) -> LinkResult<DrainReport> {
        debug!(trigger, "Starting drain");

        match self.dispatcher.drain_queue().await {
            Ok(report) => {
                if !report.already_running && !report.is_noop() {
                    self.activity.write().await.last_drain_at = Some(Utc::now());
                }
                if report.stopped_early {
                    self.emitter
                        .emit_error("Backend unreachable while replaying queued writes", true);
                }
                self.emitter.emit_drain(&report);
                Ok(report)
            }
            Err(e) => {
                error!(trigger, error = %e, "Drain failed");
                self.record_error(&e).await;
                self.emitter.emit_error(&e.to_string(), false);
                Err(e)
            }
        }
    }
}

// =============================================================================
// Backend Link
// =============================================================================

/// A fully wired link, not yet running.
pub struct BackendLink {
    shared: Arc<LinkShared>,
}

impl BackendLink {
    /// Starts building a link from `config`.
    pub fn builder(config: LinkConfig) -> BackendLinkBuilder {
        BackendLinkBuilder::new(config)
    }

    /// Builds a link with the default transport, database and emitter.
    pub async fn from_config(config: LinkConfig) -> LinkResult<Self> {
        BackendLinkBuilder::new(config).build().await
    }

    /// Current connectivity state.
    pub fn connectivity_state(&self) -> ConnectivityState {
        self.shared.probe().state()
    }

    /// Spawns the background loop and returns the handle.
    ///
    /// The first probe runs immediately. Every probe that finds the backend
    /// ONLINE with writes still queued drains them, so writes from an earlier
    /// session go out as soon as the backend answers.
    pub fn start(self) -> BackendLinkHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        info!(
            base_url = %self.shared.policy.base_url(),
            probe_interval_ms = self.shared.policy.probe_interval().as_millis() as u64,
            "Starting backend link"
        );

        let task = tokio::spawn(run_loop(self.shared.clone(), shutdown_rx));

        BackendLinkHandle {
            shared: self.shared,
            shutdown_tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Background loop: scheduled probes and drain on recovery.
///
/// Probe and drain run on this one task, so they never overlap.
async fn run_loop(shared: Arc<LinkShared>, mut shutdown_rx: mpsc::Receiver<()>) {
    let probe = shared.probe().clone();
    let mut state_rx = probe.subscribe();
    let mut last_state = *state_rx.borrow_and_update();

    let mut interval = tokio::time::interval(shared.policy.probe_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let state = probe.check().await;

                // Writes can be queued while the state stays ONLINE, and the
                // watch coalesces a recovery that happens during a drain.
                if state.is_online() {
                    match shared.queue().pending_count().await {
                        Ok(0) => {}
                        Ok(pending) => {
                            debug!(pending, "Writes waiting while online");
                            let _ = shared.drain("tick").await;
                        }
                        Err(e) => error!(error = %e, "Failed to read queue length"),
                    }
                }
            }

            changed = state_rx.changed() => {
                if changed.is_err() {
                    debug!("Probe dropped, stopping link loop");
                    break;
                }

                let state = *state_rx.borrow_and_update();
                shared.emitter.emit_state(state);

                if ConnectivityState::is_recovery(last_state, state) {
                    info!(from = %last_state, "Connectivity recovered, draining queue");
                    let _ = shared.drain("recovery").await;
                }
                last_state = state;
            }

            _ = shutdown_rx.recv() => {
                info!("Link loop received shutdown");
                break;
            }
        }
    }

    info!("Link loop stopped");
}

// =============================================================================
// Link Handle (for external control)
// =============================================================================

/// Handle to a running link. Cheap to clone.
#[derive(Clone)]
pub struct BackendLinkHandle {
    shared: Arc<LinkShared>,
    shutdown_tx: mpsc::Sender<()>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BackendLinkHandle {
    /// Executes one logical call under the link's policy.
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> LinkResult<Dispatched> {
        self.shared.ensure_open()?;

        let result = self.shared.dispatcher.execute(descriptor).await;
        if let Err(e) = &result {
            if !matches!(e, LinkError::Cancelled(_)) {
                self.shared.record_error(e).await;
            }
        }
        result
    }

    pub fn connectivity_state(&self) -> ConnectivityState {
        self.shared.probe().state()
    }

    /// Receiver that yields every connectivity change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
        self.shared.probe().subscribe()
    }

    /// Probes the backend now, outside the schedule.
    pub async fn probe_now(&self) -> LinkResult<ConnectivityState> {
        self.shared.ensure_open()?;
        Ok(self.shared.probe().check().await)
    }

    /// Every queued write, oldest first, including permanently failed ones.
    pub async fn list_pending_writes(&self) -> LinkResult<Vec<QueueEntry>> {
        self.shared.queue().list().await
    }

    pub async fn status(&self) -> LinkResult<LinkStatus> {
        let counts = self.shared.queue().counts().await?;
        let activity = self.shared.activity.read().await;

        Ok(LinkStatus {
            state: self.connectivity_state(),
            pending: counts.drainable(),
            failed_permanent: counts.failed_permanent,
            draining: self.shared.queue().is_draining(),
            storage_ok: self.shared.db.health_check().await,
            base_url: self.shared.policy.base_url().to_string(),
            force_mock_data: self.shared.policy.force_mock_data(),
            last_drain_at: activity.last_drain_at,
            last_error: activity.last_error.clone(),
        })
    }

    /// Drains the queue now, whatever the connectivity state.
    pub async fn drain_now(&self) -> LinkResult<DrainReport> {
        self.shared.ensure_open()?;
        self.shared.drain("manual").await
    }

    /// Removes a queued write the user gave up on.
    pub async fn discard_pending(&self, idempotency_key: &str) -> LinkResult<()> {
        self.shared.queue().discard(idempotency_key).await
    }

    /// Re-arms a permanently failed write. It is replayed by the next drain.
    pub async fn retry_failed(&self, idempotency_key: &str) -> LinkResult<QueueEntry> {
        self.shared.queue().retry_failed(idempotency_key).await
    }

    /// Re-arms every permanently failed write.
    pub async fn retry_all_failed(&self) -> LinkResult<u64> {
        self.shared.queue().retry_all_failed().await
    }

    /// Stops the background loop and rejects further calls.
    ///
    /// Waits for a drain in progress to finish its current pass.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down backend link");

        let _ = self.shutdown_tx.send(()).await;

        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Link loop ended abnormally");
            }
        }

        info!("Backend link stopped");
    }
}

impl std::fmt::Debug for BackendLinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLinkHandle")
            .field("state", &self.connectivity_state())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a BackendLink with options.
pub struct BackendLinkBuilder {
    config: LinkConfig,
    db: Option<Arc<Database>>,
    transport: Option<Arc<dyn Transport>>,
    mock: Option<MockDataProvider>,
    emitter: Option<Arc<dyn LinkEventEmitter>>,
}

impl BackendLinkBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: LinkConfig) -> Self {
        BackendLinkBuilder {
            config,
            db: None,
            transport: None,
            mock: None,
            emitter: None,
        }
    }

    /// Sets the database. Without one, the configured path is opened.
    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the transport. Without one, the HTTP transport is used.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the built-in mock generators.
    pub fn with_mock_provider(mut self, mock: MockDataProvider) -> Self {
        self.mock = Some(mock);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn LinkEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Resolves the policy and wires every component.
    ///
    /// ## Errors
    /// - [`LinkError::Config`] if the config does not resolve
    /// - [`LinkError::Database`] if the queue database cannot be opened
    pub async fn build(self) -> LinkResult<BackendLink> {
        let policy = Arc::new(self.config.policy()?);

        let db = match self.db {
            Some(db) => db,
            None => Arc::new(open_database(&self.config).await?),
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(policy.clone())?),
        };

        let probe = Arc::new(ConnectivityProbe::new(
            &policy,
            transport.clone(),
            ConnectivityState::Online,
        ));
        let queue = Arc::new(OfflineQueue::open(&db, policy.clone()).await?);
        let live = LiveCaller::new(policy.clone(), transport);
        let mock = Arc::new(self.mock.unwrap_or_default());

        let dispatcher = RequestDispatcher::new(policy.clone(), live, probe, mock, queue);

        Ok(BackendLink {
            shared: Arc::new(LinkShared {
                policy,
                db,
                dispatcher,
                emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
                activity: RwLock::new(Activity::default()),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

async fn open_database(config: &LinkConfig) -> LinkResult<Database> {
    let path = config.database_path();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::ConnectionFailed(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }

    info!(?path, "Opening offline queue database");
    Ok(Database::new(DbConfig::new(path)).await?)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_raw, ScriptedTransport, Step};
    use serde_json::json;
    use std::future::Future;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingEmitter {
        states: StdMutex<Vec<ConnectivityState>>,
        drains: StdMutex<Vec<u32>>,
    }

    impl LinkEventEmitter for RecordingEmitter {
        fn emit_state(&self, state: ConnectivityState) {
            self.states.lock().unwrap().push(state);
        }

        fn emit_drain(&self, report: &DrainReport) {
            self.drains.lock().unwrap().push(report.replayed);
        }

        fn emit_error(&self, _message: &str, _retryable: bool) {}
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..150 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    async fn memory_db() -> Arc<Database> {
        Arc::new(Database::new(DbConfig::in_memory()).await.unwrap())
    }

    fn config() -> LinkConfig {
        LinkConfig {
            raw: fast_raw(|b| b.retries = Some(0)),
            database_path: None,
        }
    }

    async fn start(
        db: Arc<Database>,
        transport: Arc<ScriptedTransport>,
        emitter: Arc<RecordingEmitter>,
    ) -> BackendLinkHandle {
        BackendLink::builder(config())
            .with_database(db)
            .with_transport(transport)
            .with_emitter(emitter)
            .build()
            .await
            .unwrap()
            .start()
    }

    #[tokio::test]
    async fn test_startup_drains_previous_session() {
        let db = memory_db().await;
        db.offline_queue()
            .enqueue(&RequestDescriptor::write_with_key("updateUnit", json!({}), "old-1"))
            .await
            .unwrap();

        let transport = ScriptedTransport::new();
        let link = start(db, transport.clone(), Arc::default()).await;

        eventually(|| {
            let link = link.clone();
            async move {
                let status = link.status().await.unwrap();
                status.last_drain_at.is_some()
            }
        })
        .await;

        assert_eq!(transport.keys(), vec!["old-1"]);
        assert!(link.list_pending_writes().await.unwrap().is_empty());
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_recovery_drains_queued_writes() {
        let transport = ScriptedTransport::new();
        transport.set_healthy(false);
        transport.set_fallback(Step::Network);
        let emitter = Arc::new(RecordingEmitter::default());
        let link = start(memory_db().await, transport.clone(), emitter.clone()).await;

        let mut rx = link.subscribe_state();
        while *rx.borrow_and_update() != ConnectivityState::Offline {
            rx.changed().await.unwrap();
        }

        let result = link
            .execute(&RequestDescriptor::write_with_key(
                "updateUnit",
                json!({"id": "u-1"}),
                "k1",
            ))
            .await
            .unwrap();
        assert!(result.is_queued());
        assert_eq!(link.status().await.unwrap().pending, 1);

        transport.set_fallback(Step::Reply(json!({"id": "u-1"})));
        transport.set_healthy(true);

        eventually(|| {
            let emitter = emitter.clone();
            async move {
                let replayed = emitter.drains.lock().unwrap().contains(&1);
                replayed
            }
        })
        .await;

        assert_eq!(link.status().await.unwrap().pending, 0);
        assert_eq!(transport.keys(), vec!["k1"]);
        assert_eq!(link.connectivity_state(), ConnectivityState::Online);

        let states = emitter.states.lock().unwrap().clone();
        assert!(states.starts_with(&[ConnectivityState::Degraded, ConnectivityState::Offline]));
        assert_eq!(states.last(), Some(&ConnectivityState::Online));

        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_queued_while_online_is_sent_without_outage() {
        let transport = ScriptedTransport::new();
        transport.script([Step::Network]);
        let link = start(memory_db().await, transport.clone(), Arc::default()).await;

        let result = link
            .execute(&RequestDescriptor::write_with_key("updateUnit", json!({}), "k1"))
            .await
            .unwrap();
        assert!(result.is_queued());
        assert_eq!(link.connectivity_state(), ConnectivityState::Online);

        eventually(|| {
            let link = link.clone();
            async move {
                let status = link.status().await.unwrap();
                status.pending == 0
            }
        })
        .await;

        assert_eq!(transport.keys(), vec!["k1", "k1"]);
        assert!(link.list_pending_writes().await.unwrap().is_empty());
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_first_probe_still_drains_previous_session() {
        let db = memory_db().await;
        db.offline_queue()
            .enqueue(&RequestDescriptor::write_with_key("createUnit", json!({}), "old-1"))
            .await
            .unwrap();

        let transport = ScriptedTransport::new();
        transport.script_health([false]);
        let emitter = Arc::new(RecordingEmitter::default());
        let link = start(db, transport.clone(), emitter.clone()).await;

        eventually(|| {
            let link = link.clone();
            async move {
                let status = link.status().await.unwrap();
                status.pending == 0 && status.last_drain_at.is_some()
            }
        })
        .await;

        assert_eq!(transport.keys(), vec!["old-1"]);
        let states = emitter.states.lock().unwrap().clone();
        assert_eq!(states.first(), Some(&ConnectivityState::Degraded));
        assert_eq!(link.connectivity_state(), ConnectivityState::Online);
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_replay_fails_permanently_after_five_drains() {
        let db = memory_db().await;
        db.offline_queue()
            .enqueue(&RequestDescriptor::write_with_key("deleteUnit", json!({}), "k1"))
            .await
            .unwrap();

        let transport = ScriptedTransport::new();
        transport.set_healthy(false);
        transport.set_fallback(Step::Reject(422));
        let link = start(db, transport.clone(), Arc::default()).await;

        let mut rx = link.subscribe_state();
        while *rx.borrow_and_update() != ConnectivityState::Offline {
            rx.changed().await.unwrap();
        }
        assert_eq!(transport.call_count(), 0);

        transport.set_healthy(true);

        eventually(|| {
            let link = link.clone();
            async move {
                let status = link.status().await.unwrap();
                status.failed_permanent == 1
            }
        })
        .await;

        // Excluded from later drains, still listed
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.call_count(), 5);

        let entries = link.list_pending_writes().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, unitlink_core::QueueStatus::FailedPermanent);
        assert_eq!(entries[0].attempts, 5);
        assert!(entries[0].last_error.as_deref().unwrap().contains("422"));

        let status = link.status().await.unwrap();
        assert_eq!(status.pending, 0);
        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_calls() {
        let link = start(memory_db().await, ScriptedTransport::new(), Arc::default()).await;

        link.shutdown().await;
        link.shutdown().await;

        let err = link
            .execute(&RequestDescriptor::read("getUnits", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ShuttingDown));
        assert!(matches!(link.drain_now().await, Err(LinkError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_status_tracks_queue_and_errors() {
        let transport = ScriptedTransport::new();
        transport.set_fallback(Step::Reject(422));
        let link = start(memory_db().await, transport, Arc::default()).await;

        let err = link
            .execute(&RequestDescriptor::write_with_key("createUnit", json!({}), "k9"))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Rejected { .. }));

        let status = link.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert!(status.storage_ok);
        assert_eq!(status.base_url, "http://localhost:3000");
        assert!(status.last_error.unwrap().contains("422"));

        let json = serde_json::to_value(link.status().await.unwrap()).unwrap();
        assert!(json.get("failedPermanent").is_some());

        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_discard_and_retry_through_handle() {
        let db = memory_db().await;
        let transport = ScriptedTransport::new();
        // Scheduled drains keep failing, so the entry stays until discarded
        transport.set_fallback(Step::Reject(409));
        let link = start(db.clone(), transport, Arc::default()).await;
        // Let the startup probe pass before seeding the queue
        tokio::time::sleep(Duration::from_millis(30)).await;

        let repo = db.offline_queue();
        let entry = repo
            .enqueue(&RequestDescriptor::write_with_key("deleteUnit", json!({}), "k1"))
            .await
            .unwrap()
            .into_entry();
        repo.record_failure(entry.seq, "rejected", 1).await.unwrap();

        let rearmed = link.retry_failed("k1").await.unwrap();
        assert_eq!(rearmed.attempts, 0);

        link.discard_pending("k1").await.unwrap();
        assert!(link.list_pending_writes().await.unwrap().is_empty());
        assert!(matches!(
            link.discard_pending("k1").await,
            Err(LinkError::NotQueued(_))
        ));

        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut config = config();
        config.raw.backend_config.timeout = Some(0);

        let result = BackendLink::builder(config)
            .with_database(memory_db().await)
            .build()
            .await;
        assert!(matches!(result, Err(LinkError::Config(_))));
    }
}
