//! # Error Types
//!
//! Domain-specific error types for unitlink-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  unitlink-core errors (this file)                                      │
//! │  ├── CoreError        - Schema/contract errors                         │
//! │  └── ConfigError      - Policy resolution failures (fatal at startup)  │
//! │                                                                         │
//! │  unitlink-db errors (separate crate)                                   │
//! │  └── DbError          - Queue persistence failures                     │
//! │                                                                         │
//! │  unitlink-sync errors                                                  │
//! │  └── LinkError        - What the UI sees from execute()                │
//! │                                                                         │
//! │  Flow: ConfigError → CoreError → LinkError → UI                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Neither error here is ever retried: both indicate a build-time contract
//! mismatch rather than a transient condition.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Core Error
// =============================================================================

/// Contract errors raised by pure core logic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The runtime configuration could not be turned into a policy.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// No mock generator is registered for the procedure.
    ///
    /// ## When This Occurs
    /// - The client calls a procedure the mock table has never heard of
    /// - The live schema grew a procedure and the mock table was not updated
    ///
    /// This is schema drift, so it is surfaced to the caller and never
    /// replaced by an empty payload.
    #[error("No mock data registered for procedure '{0}'")]
    UnsupportedProcedure(String),

    /// The request descriptor is malformed.
    #[error("Invalid request for '{procedure}': {reason}")]
    InvalidRequest { procedure: String, reason: String },
}

// =============================================================================
// Config Error
// =============================================================================

/// Policy resolution failures. Any of these prevents startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `backendConfig.timeout` was zero or negative.
    #[error("timeout must be greater than 0 ms, got {0}")]
    NonPositiveTimeout(i64),

    /// `backendConfig.retries` was negative.
    #[error("retries must be 0 or more, got {0}")]
    NegativeRetries(i64),

    /// The base URL is not an absolute http(s) URL.
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// Any other field outside its allowed range.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    /// Creates an InvalidValue error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_wraps_into_core_error() {
        let err: CoreError = ConfigError::NonPositiveTimeout(0).into();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_unsupported_procedure_names_the_procedure() {
        let err = CoreError::UnsupportedProcedure("getWidgets".into());
        assert!(err.to_string().contains("getWidgets"));
    }
}
