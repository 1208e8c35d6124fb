//! Configuration for the avatar streaming session

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Avatar used when no other identifier is configured
pub const DEFAULT_AVATAR_ID: &str = "90115f9617174150b47bbdbb776e5408";

/// Default streaming API endpoint
pub const DEFAULT_SERVER_URL: &str = "https://api.heygen.com";

const MAX_API_KEY_LEN: usize = 512;
const MAX_URL_LEN: usize = 2048;
const MAX_AVATAR_ID_LEN: usize = 256;

/// Session configuration, loaded once at startup and immutable afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the streaming control-plane API
    pub server_url: String,

    /// Static API key used only for token issuance
    pub api_key: String,

    /// Fixed avatar identifier
    pub avatar_id: String,

    /// Per-request timeout for control-plane calls (seconds)
    pub request_timeout_secs: u64,

    /// Timeout for joining the real-time room (seconds)
    pub connect_timeout_secs: u64,

    /// Upper bound on the best-effort stop call (seconds)
    pub stop_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: String::new(),
            avatar_id: DEFAULT_AVATAR_ID.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            stop_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults overlaid with `AVATAR_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `AVATAR_*` environment variables onto this configuration
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("AVATAR_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(key) = lookup("AVATAR_API_KEY") {
            self.api_key = key;
        }
        if let Some(id) = lookup("AVATAR_ID") {
            self.avatar_id = id;
        }
        if let Some(secs) = lookup("AVATAR_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(secs) = lookup("AVATAR_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_secs = secs;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.is_empty() {
            return Err("API key is not set (AVATAR_API_KEY)".to_string());
        }
        if self.api_key.len() > MAX_API_KEY_LEN {
            return Err(format!("API key too long (max {} chars)", MAX_API_KEY_LEN));
        }
        if self.api_key.chars().any(|c| c.is_control()) {
            return Err("API key contains invalid characters".to_string());
        }

        if self.server_url.len() > MAX_URL_LEN {
            return Err("Server URL too long".to_string());
        }
        let parsed = url::Url::parse(&self.server_url)
            .map_err(|e| format!("Invalid server URL: {}", e))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err("Server URL must use http or https".to_string());
        }

        if self.avatar_id.is_empty() {
            return Err("Avatar ID cannot be empty".to_string());
        }
        if self.avatar_id.len() > MAX_AVATAR_ID_LEN {
            return Err(format!("Avatar ID too long (max {} chars)", MAX_AVATAR_ID_LEN));
        }
        if self.avatar_id.chars().any(|c| c.is_control()) {
            return Err("Avatar ID contains invalid characters".to_string());
        }

        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 || self.stop_timeout_secs == 0 {
            return Err("Timeouts must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Server URL without trailing slashes
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}
