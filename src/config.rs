//! Configuration file parser for ~/.config/campus-sync/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as potential typos.
use crate::store::PaginationCursor;
use crate::util::{validate_api_base, EndpointError};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Env var holding the API token; takes precedence over the config file.
pub const API_TOKEN_ENV: &str = "CAMPUS_SYNC_API_TOKEN";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid api_base_url: {0}")]
    InvalidUrl(#[from] EndpointError),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The Debug impl masks `api_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the campus backend.
    pub api_base_url: String,

    /// Bearer token (alternative to the CAMPUS_SYNC_API_TOKEN env var).
    pub api_token: Option<String>,

    /// Id of the signed-in user. `--viewer` overrides.
    pub viewer_id: Option<String>,

    /// Feed page size. 0 falls back to the default.
    pub page_size: usize,

    /// Seconds before an unacknowledged optimistic mutation is rolled back.
    pub mutation_timeout_secs: u64,

    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,

    /// Quiet period after a scope change before page 1 is fetched.
    pub scope_debounce_ms: u64,

    /// How many realtime event ids are remembered for duplicate suppression.
    pub recent_event_capacity: usize,

    /// Bound of the engine's apply queue.
    pub event_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080".to_string(),
            api_token: None,
            viewer_id: None,
            page_size: PaginationCursor::DEFAULT_PAGE_SIZE,
            mutation_timeout_secs: 10,
            request_timeout_secs: 30,
            scope_debounce_ms: 300,
            recent_event_capacity: 256,
            event_queue_capacity: 64,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("viewer_id", &self.viewer_id)
            .field("page_size", &self.page_size)
            .field("mutation_timeout_secs", &self.mutation_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("scope_debounce_ms", &self.scope_debounce_ms)
            .field("recent_event_capacity", &self.recent_event_capacity)
            .field("event_queue_capacity", &self.event_queue_capacity)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "api_base_url",
        "api_token",
        "viewer_id",
        "page_size",
        "mutation_timeout_secs",
        "request_timeout_secs",
        "scope_debounce_ms",
        "recent_event_capacity",
        "event_queue_capacity",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content).inspect(|config| {
            tracing::info!(
                path = %path.display(),
                api_base_url = %config.api_base_url,
                "Loaded configuration"
            );
        })
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// Token from the environment, falling back to the config file.
    pub fn resolve_api_token(&self) -> Option<SecretString> {
        std::env::var(API_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.api_token.clone())
            .map(SecretString::from)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Ok(validate_api_base(&self.api_base_url)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Runtime settings for [`SyncEngine`](crate::controller::SyncEngine).
    pub fn engine_settings(&self, viewer_id: &str) -> EngineSettings {
        EngineSettings {
            viewer_id: viewer_id.to_string(),
            page_size: self.page_size,
            mutation_timeout: Duration::from_secs(self.mutation_timeout_secs),
            request_timeout: self.request_timeout(),
            scope_debounce: Duration::from_millis(self.scope_debounce_ms),
            recent_event_capacity: self.recent_event_capacity,
            event_queue_capacity: self.event_queue_capacity.max(1),
        }
    }
}

/// What the engine needs at runtime, derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub viewer_id: String,
    pub page_size: usize,
    pub mutation_timeout: Duration,
    /// Bound on each backend call made by the engine.
    pub request_timeout: Duration,
    pub scope_debounce: Duration,
    pub recent_event_capacity: usize,
    pub event_queue_capacity: usize,
}

impl EngineSettings {
    pub fn new(viewer_id: &str) -> Self {
        Config::default().engine_settings(viewer_id)
    }
}

// ============================================================================
// Tests
// ============================================================================
