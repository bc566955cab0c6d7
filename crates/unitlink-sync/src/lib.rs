//! # unitlink-sync: Connectivity Engine
//!
//! This crate turns an unreliable, optionally absent backend into a
//! predictable contract for the client: every call returns live data,
//! synthetic data or a queued-write receipt, each tagged with its
//! provenance, or a typed error.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Connectivity Engine                               │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 BackendLink (Main Orchestrator)                  │  │
//! │  │                                                                  │  │
//! │  │  Spawned as one Tokio task; probes on an interval and drains    │  │
//! │  │  the offline queue on recovery and while ONLINE with backlog    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │RequestDispatch.│  │ Connectivity   │  │  OfflineQueue          │    │
//! │  │                │  │ Probe          │  │                        │    │
//! │  │ live call,     │  │ health call,   │  │ durable FIFO (SQLite), │    │
//! │  │ mock fallback, │  │ 2-step         │  │ idempotent enqueue,    │    │
//! │  │ write queueing │  │ hysteresis     │  │ ordered replay         │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │  ┌───────▼────────┐  ┌────────────────┐                                │
//! │  │  LiveCaller    │─►│  Transport     │  tRPC over HTTP (reqwest)      │
//! │  │ timeout+backoff│  │  (trait)       │                                │
//! │  └────────────────┘  └────────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `BackendLink` orchestrator, handle and event emitter
//! - [`config`] - Config file + environment loading
//! - [`dispatcher`] - Per-call policy: live, mock, queue
//! - [`error`] - Link error types
//! - [`live`] - Timeout and retry around a single transport
//! - [`probe`] - Connectivity state machine
//! - [`queue`] - Offline write queue and drain
//! - [`transport`] - `Transport` trait and the HTTP implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use unitlink_core::RequestDescriptor;
//! use unitlink_sync::{BackendLink, LinkConfig};
//!
//! let config = LinkConfig::load_or_default(None);
//! let link = BackendLink::from_config(config).await?.start();
//!
//! let units = link
//!     .execute(&RequestDescriptor::read("getUnits", serde_json::json!({"page": 1})))
//!     .await?;
//! println!("{} data: {:?}", units.provenance, units.data());
//!
//! link.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod live;
pub mod probe;
pub mod queue;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{
    BackendLink, BackendLinkBuilder, BackendLinkHandle, LinkEventEmitter, LinkStatus, NoOpEmitter,
};
pub use config::LinkConfig;
pub use dispatcher::RequestDispatcher;
pub use error::{LinkError, LinkResult};
pub use live::LiveCaller;
pub use probe::ConnectivityProbe;
pub use queue::{DrainReport, OfflineQueue};
pub use transport::{HttpTransport, Transport};
