//! # Config Resolution
//!
//! Turns the loose runtime configuration object shipped with the client into
//! an immutable, validated [`Policy`].
//!
//! ## Raw Shape
//! ```json
//! {
//!   "apiUrl": "https://units.example.com",
//!   "backendConfig": {
//!     "baseUrl": "https://units.example.com",
//!     "trpcEndpoint": "/api/trpc",
//!     "timeout": 30000,
//!     "retries": 3,
//!     "enableMockData": true,
//!     "enableOfflineMode": true
//!   }
//! }
//! ```
//!
//! ## Resolution Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Field               Source                        Default              │
//! │  ─────────────────   ──────────────────────────    ──────────────────   │
//! │  base_url            backendConfig.baseUrl         apiUrl, then         │
//! │                                                    http://localhost:3000│
//! │  procedure_prefix    backendConfig.trpcEndpoint    /api/trpc            │
//! │  timeout             backendConfig.timeout (ms)    30000  (must be > 0) │
//! │  max_retries         backendConfig.retries         3      (must be ≥ 0) │
//! │  enable_mock_data    backendConfig.enableMockData  true                 │
//! │  enable_offline_mode backendConfig.enableOffline…  true                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`resolve`] is pure: it reads nothing but its argument. File loading and
//! environment overrides live in `unitlink-sync::config`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;
use crate::{
    BACKOFF_CEILING_MS, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BASE_URL,
    DEFAULT_DEGRADED_AFTER_FAILURES, DEFAULT_HEALTH_PATH, DEFAULT_MAX_DRAIN_ATTEMPTS,
    DEFAULT_MAX_RETRIES, DEFAULT_PROBE_INTERVAL_MS, DEFAULT_PROBE_TIMEOUT_MS,
    DEFAULT_QUEUE_WARN_THRESHOLD, DEFAULT_TIMEOUT_MS, DEFAULT_TRPC_ENDPOINT,
};

// =============================================================================
// Raw Configuration
// =============================================================================

/// The runtime configuration object as the client ships it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    /// Legacy top-level API URL, used when `backendConfig.baseUrl` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Backend connectivity settings.
    #[serde(default)]
    pub backend_config: RawBackendConfig,
}

/// The `backendConfig` block. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trpc_endpoint: Option<String>,

    /// Live call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,

    /// Retries after the first attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_mock_data: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_offline_mode: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<i64>,

    /// Serve every call from mock data without touching the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_mock_data: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_interval_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_drain_attempts: Option<i64>,

    /// Hard cap on queued writes. Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_len: Option<i64>,
}

// =============================================================================
// Policy
// =============================================================================

/// Resolved connectivity policy.
///
/// Built once per process by [`resolve`] and shared read-only (behind an
/// `Arc`) by every component. There are no setters.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    timeout: Duration,
    max_retries: u32,
    backoff: BackoffPolicy,
    enable_mock_data: bool,
    enable_offline_mode: bool,
    force_mock_data: bool,
    base_url: String,
    procedure_prefix: String,
    health_path: String,
    probe_interval: Duration,
    probe_timeout: Duration,
    max_drain_attempts: u32,
    degraded_after_failures: u32,
    queue_warn_threshold: usize,
    max_queue_len: Option<usize>,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::new(
                Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
                Duration::from_millis(BACKOFF_CEILING_MS),
            ),
            enable_mock_data: true,
            enable_offline_mode: true,
            force_mock_data: false,
            base_url: DEFAULT_BASE_URL.to_string(),
            procedure_prefix: DEFAULT_TRPC_ENDPOINT.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            probe_interval: Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            max_drain_attempts: DEFAULT_MAX_DRAIN_ATTEMPTS,
            degraded_after_failures: DEFAULT_DEGRADED_AFTER_FAILURES,
            queue_warn_threshold: DEFAULT_QUEUE_WARN_THRESHOLD,
            max_queue_len: None,
        }
    }
}

impl Policy {
    /// Timeout applied to every live call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retries after the first live attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total live attempts for one dispatch: `max_retries + 1`.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Whether exhausted reads may fall back to synthetic data.
    pub fn enable_mock_data(&self) -> bool {
        self.enable_mock_data
    }

    /// Whether exhausted or offline writes may be queued.
    pub fn enable_offline_mode(&self) -> bool {
        self.enable_offline_mode
    }

    /// Whether every call is served from mock data.
    pub fn force_mock_data(&self) -> bool {
        self.force_mock_data
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// tRPC path prefix, always starting with `/` and never ending with one.
    pub fn procedure_prefix(&self) -> &str {
        &self.procedure_prefix
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Failed drain attempts before a write becomes FAILED_PERMANENT.
    pub fn max_drain_attempts(&self) -> u32 {
        self.max_drain_attempts
    }

    pub fn degraded_after_failures(&self) -> u32 {
        self.degraded_after_failures
    }

    pub fn queue_warn_threshold(&self) -> usize {
        self.queue_warn_threshold
    }

    pub fn max_queue_len(&self) -> Option<usize> {
        self.max_queue_len
    }

    /// Full URL of a procedure.
    ///
    /// ## Example
    /// ```rust
    /// let policy = unitlink_core::Policy::default();
    /// assert_eq!(
    ///     policy.procedure_url("getUnits"),
    ///     "http://localhost:3000/api/trpc/getUnits"
    /// );
    /// ```
    pub fn procedure_url(&self, procedure: &str) -> String {
        format!("{}{}/{}", self.base_url, self.procedure_prefix, procedure)
    }

    /// Full URL of the health call.
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_path)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolves a raw configuration object into a [`Policy`].
///
/// ## Errors
/// - [`ConfigError::NonPositiveTimeout`] if `timeout <= 0`
/// - [`ConfigError::NegativeRetries`] if `retries < 0`
/// - [`ConfigError::InvalidBaseUrl`] if the base URL is not absolute http(s)
/// - [`ConfigError::InvalidValue`] for any other out-of-range field
pub fn resolve(raw: &RawConfig) -> Result<Policy, ConfigError> {
    let backend = &raw.backend_config;
    let defaults = Policy::default();

    let timeout = match backend.timeout {
        Some(ms) if ms <= 0 => return Err(ConfigError::NonPositiveTimeout(ms)),
        Some(ms) => Duration::from_millis(ms as u64),
        None => defaults.timeout,
    };

    let max_retries = match backend.retries {
        Some(n) if n < 0 => return Err(ConfigError::NegativeRetries(n)),
        Some(n) => u32::try_from(n)
            .map_err(|_| ConfigError::invalid("retries", format!("{} is too large", n)))?,
        None => defaults.max_retries,
    };

    let backoff_base = match backend.backoff_base_ms {
        Some(ms) if ms < 0 => {
            return Err(ConfigError::invalid("backoffBaseMs", "must be 0 or more"))
        }
        Some(ms) => Duration::from_millis(ms as u64),
        None => Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
    };

    let base_url = backend
        .base_url
        .as_deref()
        .or(raw.api_url.as_deref())
        .unwrap_or(DEFAULT_BASE_URL);
    let base_url = normalize_base_url(base_url)?;

    let procedure_prefix = normalize_path(
        backend
            .trpc_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_TRPC_ENDPOINT),
    );
    let health_path = normalize_path(backend.health_path.as_deref().unwrap_or(DEFAULT_HEALTH_PATH));

    let probe_interval = positive_millis(
        "probeIntervalMs",
        backend.probe_interval_ms,
        defaults.probe_interval,
    )?;
    let probe_timeout = positive_millis(
        "probeTimeoutMs",
        backend.probe_timeout_ms,
        defaults.probe_timeout,
    )?;

    let max_drain_attempts = match backend.max_drain_attempts {
        Some(n) if n <= 0 => {
            return Err(ConfigError::invalid(
                "maxDrainAttempts",
                "must be greater than 0",
            ))
        }
        Some(n) => u32::try_from(n)
            .map_err(|_| ConfigError::invalid("maxDrainAttempts", "too large"))?,
        None => defaults.max_drain_attempts,
    };

    let max_queue_len = match backend.max_queue_len {
        Some(n) if n <= 0 => {
            return Err(ConfigError::invalid("maxQueueLen", "must be greater than 0"))
        }
        Some(n) => Some(n as usize),
        None => None,
    };

    Ok(Policy {
        timeout,
        max_retries,
        backoff: BackoffPolicy::new(backoff_base, Duration::from_millis(BACKOFF_CEILING_MS)),
        enable_mock_data: backend.enable_mock_data.unwrap_or(true),
        enable_offline_mode: backend.enable_offline_mode.unwrap_or(true),
        force_mock_data: backend.force_mock_data.unwrap_or(false),
        base_url,
        procedure_prefix,
        health_path,
        probe_interval,
        probe_timeout,
        max_drain_attempts,
        degraded_after_failures: defaults.degraded_after_failures,
        queue_warn_threshold: defaults.queue_warn_threshold,
        max_queue_len,
    })
}

fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn positive_millis(
    field: &'static str,
    value: Option<i64>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(ms) if ms <= 0 => Err(ConfigError::invalid(field, "must be greater than 0")),
        Some(ms) => Ok(Duration::from_millis(ms as u64)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(backend: RawBackendConfig) -> RawConfig {
        RawConfig {
            api_url: None,
            backend_config: backend,
        }
    }

    #[test]
    fn test_defaults() {
        let policy = resolve(&RawConfig::default()).unwrap();
        assert_eq!(policy.timeout(), Duration::from_millis(30_000));
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.enable_mock_data());
        assert!(policy.enable_offline_mode());
        assert!(!policy.force_mock_data());
        assert_eq!(policy.base_url(), "http://localhost:3000");
        assert_eq!(policy.procedure_prefix(), "/api/trpc");
        assert_eq!(policy.max_drain_attempts(), 5);
        assert_eq!(policy, Policy::default());
    }

    #[test]
    fn test_rejects_non_positive_timeout() {
        let err = resolve(&raw(RawBackendConfig {
            timeout: Some(0),
            ..Default::default()
        }))
        .unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveTimeout(0));

        let err = resolve(&raw(RawBackendConfig {
            timeout: Some(-5),
            ..Default::default()
        }))
        .unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveTimeout(-5));
    }

    #[test]
    fn test_rejects_negative_retries() {
        let err = resolve(&raw(RawBackendConfig {
            retries: Some(-1),
            ..Default::default()
        }))
        .unwrap_err();
        assert_eq!(err, ConfigError::NegativeRetries(-1));
    }

    #[test]
    fn test_zero_retries_is_valid() {
        let policy = resolve(&raw(RawBackendConfig {
            retries: Some(0),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_base_url_falls_back_to_api_url() {
        let policy = resolve(&RawConfig {
            api_url: Some("https://units.example.com/".into()),
            backend_config: RawBackendConfig::default(),
        })
        .unwrap();
        assert_eq!(policy.base_url(), "https://units.example.com");

        let policy = resolve(&RawConfig {
            api_url: Some("https://legacy.example.com".into()),
            backend_config: RawBackendConfig {
                base_url: Some("https://api.example.com".into()),
                ..Default::default()
            },
        })
        .unwrap();
        assert_eq!(policy.base_url(), "https://api.example.com");
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            resolve(&raw(RawBackendConfig {
                base_url: Some("not a url".into()),
                ..Default::default()
            })),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            resolve(&raw(RawBackendConfig {
                base_url: Some("ftp://files.example.com".into()),
                ..Default::default()
            })),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_urls_are_normalized() {
        let policy = resolve(&raw(RawBackendConfig {
            base_url: Some("http://10.0.2.2:4000/".into()),
            trpc_endpoint: Some("trpc/".into()),
            health_path: Some("healthz".into()),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(policy.procedure_url("updateUnit"), "http://10.0.2.2:4000/trpc/updateUnit");
        assert_eq!(policy.health_url(), "http://10.0.2.2:4000/healthz");
    }

    #[test]
    fn test_parses_expo_extra_json() {
        let json = r#"{
            "apiUrl": "http://localhost:3000",
            "backendConfig": {
                "baseUrl": "http://localhost:3000",
                "trpcEndpoint": "/api/trpc",
                "timeout": 100,
                "retries": 2,
                "enableMockData": true,
                "enableOfflineMode": false
            }
        }"#;
        let raw: RawConfig = serde_json::from_str(json).unwrap();
        let policy = resolve(&raw).unwrap();
        assert_eq!(policy.timeout(), Duration::from_millis(100));
        assert_eq!(policy.max_retries(), 2);
        assert!(!policy.enable_offline_mode());
    }

    #[test]
    fn test_optional_limits() {
        let policy = resolve(&raw(RawBackendConfig {
            max_queue_len: Some(10),
            max_drain_attempts: Some(2),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(policy.max_queue_len(), Some(10));
        assert_eq!(policy.max_drain_attempts(), 2);

        assert!(resolve(&raw(RawBackendConfig {
            max_drain_attempts: Some(0),
            ..Default::default()
        }))
        .is_err());
    }
}
