//! # Link Configuration
//!
//! Loads the runtime configuration object from disk and the environment and
//! resolves it into a [`Policy`].
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     UNITLINK_BASE_URL=https://units.example.com                        │
//! │     UNITLINK_TIMEOUT_MS=10000                                          │
//! │                                                                         │
//! │  2. Config File                                                        │
//! │     app.config.json  (Expo shape: { "expo": { "extra": {...} } })      │
//! │     unitlink.toml    (same keys, TOML)                                 │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     timeout 30 s, 3 retries, mock + offline mode on                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## TOML Format
//! ```toml
//! apiUrl = "https://units.example.com"
//! databasePath = "/var/lib/unitlink/queue.db"
//!
//! [backendConfig]
//! trpcEndpoint = "/api/trpc"
//! timeout = 30000
//! retries = 3
//! enableMockData = true
//! enableOfflineMode = true
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use unitlink_core::{resolve, Policy, RawConfig};

use crate::error::{LinkError, LinkResult};

const CONFIG_FILE_NAME: &str = "unitlink.toml";
const DATABASE_FILE_NAME: &str = "unitlink.db";

// =============================================================================
// Link Configuration
// =============================================================================

/// Everything needed to start a `BackendLink`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    /// The client's runtime config object (`apiUrl`, `backendConfig`).
    #[serde(flatten)]
    pub raw: RawConfig,

    /// Offline queue database file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl LinkConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults, then checks
    /// that it resolves.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`.json` or `.toml`, chosen by extension)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> LinkResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading link config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if loading fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load link config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a config file. JSON files may be a bare config object, an
    /// `extra` block, or a full Expo `app.config.json`.
    pub fn from_file(path: &Path) -> LinkResult<Self> {
        let contents = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&contents)
        } else {
            Ok(toml::from_str(&contents)?)
        }
    }

    /// Parses a JSON config document.
    pub fn from_json_str(contents: &str) -> LinkResult<Self> {
        let document: Value = serde_json::from_str(contents)
            .map_err(|e| LinkError::ConfigLoadFailed(e.to_string()))?;

        let body = document
            .pointer("/expo/extra")
            .or_else(|| document.get("extra"))
            .unwrap_or(&document)
            .clone();

        serde_json::from_value(body).map_err(|e| LinkError::ConfigLoadFailed(e.to_string()))
    }

    /// Saves configuration as TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> LinkResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| LinkError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Link config saved");
        Ok(())
    }

    /// Checks that the configuration resolves into a policy.
    pub fn validate(&self) -> LinkResult<()> {
        self.policy().map(|_| ())
    }

    /// Resolves the runtime config into a [`Policy`].
    pub fn policy(&self) -> LinkResult<Policy> {
        Ok(resolve(&self.raw)?)
    }

    /// Database file path, falling back to the platform data directory and
    /// finally to the working directory.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .or_else(Self::default_database_path)
            .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME))
    }

    /// Applies `UNITLINK_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from any variable source.
    ///
    /// Unparseable numbers and booleans are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = &mut self.raw.backend_config;

        if let Some(url) = lookup("UNITLINK_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            backend.base_url = Some(url);
        }

        if let Some(endpoint) = lookup("UNITLINK_TRPC_ENDPOINT") {
            backend.trpc_endpoint = Some(endpoint);
        }

        if let Some(value) = lookup("UNITLINK_TIMEOUT_MS") {
            match value.trim().parse::<i64>() {
                Ok(ms) => {
                    debug!(timeout_ms = ms, "Overriding timeout from environment");
                    backend.timeout = Some(ms);
                }
                Err(_) => warn!(value = %value, "Ignoring non-numeric UNITLINK_TIMEOUT_MS"),
            }
        }

        if let Some(value) = lookup("UNITLINK_RETRIES") {
            match value.trim().parse::<i64>() {
                Ok(n) => backend.retries = Some(n),
                Err(_) => warn!(value = %value, "Ignoring non-numeric UNITLINK_RETRIES"),
            }
        }

        if let Some(value) = lookup("UNITLINK_MOCK_DATA") {
            match parse_flag(&value) {
                Some(flag) => backend.enable_mock_data = Some(flag),
                None => warn!(value = %value, "Ignoring invalid UNITLINK_MOCK_DATA"),
            }
        }

        if let Some(value) = lookup("UNITLINK_OFFLINE_MODE") {
            match parse_flag(&value) {
                Some(flag) => backend.enable_offline_mode = Some(flag),
                None => warn!(value = %value, "Ignoring invalid UNITLINK_OFFLINE_MODE"),
            }
        }

        if let Some(value) = lookup("UNITLINK_FORCE_MOCK") {
            match parse_flag(&value) {
                Some(flag) => {
                    debug!(force_mock = flag, "Overriding forced mock mode from environment");
                    backend.force_mock_data = Some(flag);
                }
                None => warn!(value = %value, "Ignoring invalid UNITLINK_FORCE_MOCK"),
            }
        }

        if let Some(path) = lookup("UNITLINK_DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "unitlink", "unitlink")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Returns the default database file path.
    pub fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "unitlink", "unitlink")
            .map(|dirs| dirs.data_dir().join(DATABASE_FILE_NAME))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
