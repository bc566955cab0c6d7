//! # Link Error Types
//!
//! Error types for the connectivity engine. This is what the UI sees from
//! `execute()`.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Link Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Contract            │ │
//! │  │                 │  │  (retryable)    │  │  (never retried)        │ │
//! │  │  Config         │  │  Timeout        │  │  UnsupportedProcedure   │ │
//! │  │  ConfigLoad     │  │  NetworkFailure │  │  InvalidRequest         │ │
//! │  │  ConfigSave     │  │  Server (5xx)   │  │  Rejected (4xx)         │ │
//! │  │                 │  │                 │  │  Protocol               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Exhaustion    │  │     Queue       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Unreachable    │  │  QueueFull      │  │  Cancelled              │ │
//! │  │                 │  │  FailedPermanent│  │  Database               │ │
//! │  │                 │  │  NotQueued      │  │  Serialization          │ │
//! │  │                 │  │                 │  │  ShuttingDown, Internal │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transient transport failures are retried inside the live caller; only
//! [`LinkError::Unreachable`] (exhaustion) escapes it.

use thiserror::Error;

use unitlink_core::{ConfigError, CoreError};

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Error type covering every failure of the connectivity engine.
#[derive(Debug, Error)]
pub enum LinkError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// The configuration could not be resolved into a policy. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Failed to read or parse the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to write the config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors (retryable)
    // =========================================================================
    /// A single live attempt did not complete in time.
    #[error("'{procedure}' timed out after {after_ms} ms")]
    Timeout { procedure: String, after_ms: u64 },

    /// The request never produced an HTTP response.
    #[error("Network failure calling '{procedure}': {reason}")]
    NetworkFailure { procedure: String, reason: String },

    /// The server answered with a 5xx status.
    #[error("Server error {status} from '{procedure}': {message}")]
    Server {
        procedure: String,
        status: u16,
        message: String,
    },

    // =========================================================================
    // Contract Errors (never retried)
    // =========================================================================
    /// The server refused the request (4xx). Retrying cannot help.
    #[error("'{procedure}' rejected with status {status}: {message}")]
    Rejected {
        procedure: String,
        status: u16,
        message: String,
    },

    /// The response body was not the expected tRPC envelope.
    #[error("Protocol error from '{procedure}': {reason}")]
    Protocol { procedure: String, reason: String },

    /// No mock data is registered for the procedure (schema drift).
    #[error("No mock data registered for procedure '{0}'")]
    UnsupportedProcedure(String),

    /// The request descriptor is malformed.
    #[error("Invalid request for '{procedure}': {reason}")]
    InvalidRequest { procedure: String, reason: String },

    // =========================================================================
    // Exhaustion
    // =========================================================================
    /// Every live attempt failed and no fallback applied.
    #[error("'{procedure}' unreachable after {attempts} attempts: {last_error}")]
    Unreachable {
        procedure: String,
        attempts: u32,
        last_error: String,
    },

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// The configured queue cap was reached.
    #[error("Offline queue is full ({limit} entries)")]
    QueueFull { limit: usize },

    /// A queued write reached the drain attempt ceiling.
    #[error("Queued write {key} failed permanently after {attempts} attempts: {last_error}")]
    FailedPermanent {
        key: String,
        attempts: u32,
        last_error: String,
    },

    /// No queued write has this idempotency key (or it is not in the
    /// required status).
    #[error("No queued write with key {0}")]
    NotQueued(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The descriptor was cancelled before dispatch.
    #[error("Request for '{0}' was cancelled")]
    Cancelled(String),

    /// Queue persistence failed.
    #[error("Database error: {0}")]
    Database(#[from] unitlink_db::DbError),

    /// JSON (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The link has been shut down.
    #[error("Backend link is shutting down")]
    ShuttingDown,

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for LinkError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(e) => LinkError::Config(e),
            CoreError::UnsupportedProcedure(p) => LinkError::UnsupportedProcedure(p),
            CoreError::InvalidRequest { procedure, reason } => {
                LinkError::InvalidRequest { procedure, reason }
            }
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        LinkError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for LinkError {
    fn from(err: toml::ser::Error) -> Self {
        LinkError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl LinkError {
    /// Returns true if another live attempt could succeed.
    ///
    /// ## Retryable Errors
    /// - Timeouts
    /// - Network failures
    /// - Server errors (5xx)
    ///
    /// ## Non-Retryable Errors
    /// - Rejections (4xx), protocol and contract errors
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Timeout { .. } | LinkError::NetworkFailure { .. } | LinkError::Server { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            LinkError::Config(_) | LinkError::ConfigLoadFailed(_) | LinkError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the backend could not be reached at all (as opposed to
    /// reached and refusing).
    pub fn is_unreachable(&self) -> bool {
        matches!(self, LinkError::Unreachable { .. }) || self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(LinkError::Timeout {
            procedure: "getUnits".into(),
            after_ms: 100
        }
        .is_retryable());
        assert!(LinkError::NetworkFailure {
            procedure: "getUnits".into(),
            reason: "connection refused".into()
        }
        .is_retryable());
        assert!(LinkError::Server {
            procedure: "getUnits".into(),
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!LinkError::Rejected {
            procedure: "createUnit".into(),
            status: 422,
            message: "bad input".into()
        }
        .is_retryable());
        assert!(!LinkError::UnsupportedProcedure("getWidgets".into()).is_retryable());
        assert!(!LinkError::Config(ConfigError::NonPositiveTimeout(0)).is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(LinkError::Config(ConfigError::NegativeRetries(-1)).is_config_error());
        assert!(LinkError::ConfigLoadFailed("missing".into()).is_config_error());
        assert!(!LinkError::ShuttingDown.is_config_error());
    }

    #[test]
    fn test_unreachable_category() {
        let err = LinkError::Unreachable {
            procedure: "updateUnit".into(),
            attempts: 4,
            last_error: "timed out".into(),
        };
        assert!(err.is_unreachable());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("4 attempts"));
    }

    #[test]
    fn test_core_error_mapping() {
        let err: LinkError = CoreError::UnsupportedProcedure("getWidgets".into()).into();
        assert!(matches!(err, LinkError::UnsupportedProcedure(p) if p == "getWidgets"));

        let err: LinkError = CoreError::Config(ConfigError::NonPositiveTimeout(-5)).into();
        assert!(err.is_config_error());
    }
}
