//! # Domain Types
//!
//! Core types shared by every component of the connectivity layer.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌─────────────────────┐                     │
//! │  │ RequestDescriptor   │   │    QueueEntry       │                     │
//! │  │ ─────────────────── │   │ ─────────────────── │                     │
//! │  │ procedure           │◄──│ descriptor          │                     │
//! │  │ kind (read/write)   │   │ seq (FIFO position) │                     │
//! │  │ payload (JSON)      │   │ attempts            │                     │
//! │  │ idempotency_key     │   │ last_error          │                     │
//! │  │ issued_at           │   │ status              │                     │
//! │  └─────────────────────┘   └─────────────────────┘                     │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌─────────────────────┐                     │
//! │  │ ConnectivityState   │   │    Dispatched       │                     │
//! │  │ ─────────────────── │   │ ─────────────────── │                     │
//! │  │ Online              │   │ provenance          │                     │
//! │  │ Degraded            │   │  (live/mock/queued) │                     │
//! │  │ Offline             │   │ outcome             │                     │
//! │  └─────────────────────┘   └─────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Connectivity State
// =============================================================================

/// Reachability of the remote backend as last judged by the probe.
///
/// ## Transitions
/// ```text
///            probe fail            probe fail
///   ONLINE ─────────────► DEGRADED ────────────► OFFLINE ──┐
///     ▲                       │                     │      │ probe fail
///     │      probe ok         │                     │      │
///     └───────────────────────┴─────────────────────┘◄─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// Health probe succeeds and live calls go through.
    Online,

    /// One probe failed after being online, or live calls keep failing.
    Degraded,

    /// Two or more consecutive probe failures.
    Offline,
}

impl ConnectivityState {
    /// State after a probe result, starting from `self`.
    pub fn after_probe(self, success: bool) -> Self {
        match (self, success) {
            (_, true) => ConnectivityState::Online,
            (ConnectivityState::Online, false) => ConnectivityState::Degraded,
            (ConnectivityState::Degraded, false) | (ConnectivityState::Offline, false) => {
                ConnectivityState::Offline
            }
        }
    }

    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }

    /// True for a move from DEGRADED or OFFLINE back to ONLINE.
    pub fn is_recovery(from: Self, to: Self) -> bool {
        !from.is_online() && to.is_online()
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Degraded => write!(f, "degraded"),
            ConnectivityState::Offline => write!(f, "offline"),
        }
    }
}

// =============================================================================
// Request Descriptor
// =============================================================================

/// Whether a procedure reads or mutates remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Read,
    Write,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Read => write!(f, "read"),
            RequestKind::Write => write!(f, "write"),
        }
    }
}

/// Shared cancellation flag for a descriptor.
///
/// Only honoured before dispatch. Once a call reaches the transport it runs
/// to completion or timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One logical call issued by the UI.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RequestDescriptor {
    /// Remote procedure name, e.g. `getUnits`.
    pub procedure: String,

    pub kind: RequestKind,

    /// Procedure input, passed through untouched.
    #[ts(type = "unknown")]
    pub payload: Value,

    /// Required for writes. See [`derive_idempotency_key`].
    pub idempotency_key: Option<String>,

    #[ts(as = "String")]
    pub issued_at: DateTime<Utc>,

    #[serde(skip)]
    #[ts(skip)]
    cancel: CancelFlag,
}

impl RequestDescriptor {
    /// Creates a read descriptor.
    pub fn read(procedure: impl Into<String>, payload: Value) -> Self {
        RequestDescriptor {
            procedure: procedure.into(),
            kind: RequestKind::Read,
            payload,
            idempotency_key: None,
            issued_at: Utc::now(),
            cancel: CancelFlag::default(),
        }
    }

    /// Creates a write descriptor whose idempotency key is derived from the
    /// procedure, the payload and a client-issued nonce.
    ///
    /// Reusing the nonce for a UI retry of the same action yields the same key.
    pub fn write(procedure: impl Into<String>, payload: Value, nonce: &str) -> Self {
        let procedure = procedure.into();
        let key = derive_idempotency_key(&procedure, &payload, nonce);
        Self::write_with_key(procedure, payload, key)
    }

    /// Creates a write descriptor with a caller-supplied idempotency key.
    pub fn write_with_key(
        procedure: impl Into<String>,
        payload: Value,
        idempotency_key: impl Into<String>,
    ) -> Self {
        RequestDescriptor {
            procedure: procedure.into(),
            kind: RequestKind::Write,
            payload,
            idempotency_key: Some(idempotency_key.into()),
            issued_at: Utc::now(),
            cancel: CancelFlag::default(),
        }
    }

    pub fn is_write(&self) -> bool {
        self.kind == RequestKind::Write
    }

    /// The idempotency key, or an empty string for reads.
    pub fn key(&self) -> &str {
        self.idempotency_key.as_deref().unwrap_or_default()
    }

    /// A handle the caller can keep to cancel this descriptor later.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Marks the descriptor as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Checks the descriptor's own invariants.
    ///
    /// ## Rules
    /// - procedure name is not empty
    /// - writes carry a non-empty idempotency key
    pub fn validate(&self) -> CoreResult<()> {
        if self.procedure.trim().is_empty() {
            return Err(CoreError::InvalidRequest {
                procedure: self.procedure.clone(),
                reason: "procedure name is empty".into(),
            });
        }

        if self.is_write() && self.key().is_empty() {
            return Err(CoreError::InvalidRequest {
                procedure: self.procedure.clone(),
                reason: "writes require an idempotency key".into(),
            });
        }

        Ok(())
    }
}

/// Derives a deterministic idempotency key.
///
/// `hex(sha256(procedure ␀ payload-json ␀ nonce))`. `serde_json` serializes
/// object keys in sorted order, so structurally equal payloads hash equally.
pub fn derive_idempotency_key(procedure: &str, payload: &Value, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(procedure.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(nonce.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a fresh client nonce (UUID v4).
pub fn new_nonce() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Queue Entry
// =============================================================================

/// Lifecycle status of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for the next drain.
    Pending,

    /// Currently being replayed.
    InFlight,

    /// Reached the attempt ceiling; kept for inspection, never drained again.
    FailedPermanent,
}

impl QueueStatus {
    /// Whether an automatic drain may pick this entry up.
    pub fn is_drainable(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::InFlight)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Pending => write!(f, "pending"),
            QueueStatus::InFlight => write!(f, "in_flight"),
            QueueStatus::FailedPermanent => write!(f, "failed_permanent"),
        }
    }
}

/// A write recorded while the backend could not take it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueEntry {
    /// Durable enqueue position. Drains run in ascending `seq`.
    pub seq: i64,

    pub descriptor: RequestDescriptor,

    /// Failed drain attempts so far.
    pub attempts: u32,

    pub last_error: Option<String>,

    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,

    pub status: QueueStatus,
}

impl QueueEntry {
    pub fn idempotency_key(&self) -> &str {
        self.descriptor.key()
    }

    pub fn procedure(&self) -> &str {
        &self.descriptor.procedure
    }
}

// =============================================================================
// Dispatch Result
// =============================================================================

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Authoritative data from the backend.
    Live,

    /// Synthetic data from the mock provider.
    Mock,

    /// A write accepted into the offline queue, not yet applied remotely.
    Queued,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Live => write!(f, "live"),
            Provenance::Mock => write!(f, "mock"),
            Provenance::Queued => write!(f, "queued"),
        }
    }
}

/// Payload of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A response body, live or synthetic.
    Data {
        #[ts(type = "unknown")]
        value: Value,
    },

    /// The write was accepted without a response body.
    Accepted {
        queued: bool,
        idempotency_key: String,
    },
}

/// A dispatch result tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Dispatched {
    pub provenance: Provenance,
    pub outcome: DispatchOutcome,
}

impl Dispatched {
    pub fn live(value: Value) -> Self {
        Dispatched {
            provenance: Provenance::Live,
            outcome: DispatchOutcome::Data { value },
        }
    }

    pub fn mock(value: Value) -> Self {
        Dispatched {
            provenance: Provenance::Mock,
            outcome: DispatchOutcome::Data { value },
        }
    }

    /// `Accepted(queued = true)`.
    pub fn queued(idempotency_key: impl Into<String>) -> Self {
        Dispatched {
            provenance: Provenance::Queued,
            outcome: DispatchOutcome::Accepted {
                queued: true,
                idempotency_key: idempotency_key.into(),
            },
        }
    }

    /// Response body, if any.
    pub fn data(&self) -> Option<&Value> {
        match &self.outcome {
            DispatchOutcome::Data { value } => Some(value),
            DispatchOutcome::Accepted { .. } => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Accepted { queued: true, .. })
    }

    /// Only live data is authoritative.
    pub fn is_authoritative(&self) -> bool {
        self.provenance == Provenance::Live
    }
}
