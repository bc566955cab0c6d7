//! # unitlink-core: Pure Connectivity Logic
//!
//! This crate holds everything about the backend connectivity layer that can
//! be expressed without touching the network, the disk or a clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       unitlink Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              React Native client (screens, stores)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ execute / state / pending writes       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │           unitlink-sync (probe, dispatcher, queue)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ unitlink-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  config   │  │   types   │  │  backoff  │  │   mock    │  │   │
//! │  │   │  Policy   │  │ Descriptor│  │  delay()  │  │ Provider  │  │   │
//! │  │   │  resolve  │  │ QueueEntry│  │  jitter   │  │ schemas   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Raw runtime config and the resolved, immutable [`Policy`]
//! - [`types`] - Connectivity state, request descriptors, queue entries, provenance
//! - [`backoff`] - Pure retry delay schedule
//! - [`mock`] - Deterministic synthetic responses for every known procedure
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use unitlink_core::config::{resolve, RawConfig};
//! use unitlink_core::ConnectivityState;
//!
//! let policy = resolve(&RawConfig::default()).unwrap();
//! assert_eq!(policy.max_retries(), 3);
//!
//! // Two failures are needed to go from ONLINE to OFFLINE
//! let state = ConnectivityState::Online.after_probe(false);
//! assert_eq!(state, ConnectivityState::Degraded);
//! assert_eq!(state.after_probe(false), ConnectivityState::Offline);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoff;
pub mod config;
pub mod error;
pub mod mock;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use backoff::BackoffPolicy;
pub use config::{resolve, Policy, RawBackendConfig, RawConfig};
pub use error::{ConfigError, CoreError, CoreResult};
pub use mock::MockDataProvider;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Live call timeout when the config does not name one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Retries after the first live attempt when the config does not name a count.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First backoff step; doubled on every retry.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Upper bound for a single backoff delay.
pub const BACKOFF_CEILING_MS: u64 = 10_000;

/// Base URL used when neither `backendConfig.baseUrl` nor `apiUrl` is set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Path prefix of the tRPC procedure endpoint.
pub const DEFAULT_TRPC_ENDPOINT: &str = "/api/trpc";

/// Path of the lightweight health call.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Interval between scheduled connectivity probes.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 15_000;

/// Bound on a single health call.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Failed drain attempts after which a queued write becomes FAILED_PERMANENT.
pub const DEFAULT_MAX_DRAIN_ATTEMPTS: u32 = 5;

/// Consecutive exhausted live calls that demote ONLINE to DEGRADED.
pub const DEFAULT_DEGRADED_AFTER_FAILURES: u32 = 3;

/// Queue length above which every enqueue logs a warning.
pub const DEFAULT_QUEUE_WARN_THRESHOLD: usize = 500;
