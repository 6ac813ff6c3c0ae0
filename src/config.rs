//! Agent configuration.
//!
//! Loaded from an optional JSON file; every field has a default. Fetch
//! settings can also come from `SCRAPE_*` environment variables, and CLI
//! flags override both (applied in `main`).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::transport::protocol::{Codec, DEFAULT_SEPARATOR};

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Controller endpoint (`ws://` or `wss://`).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Payload of the INIT handshake frame; identifies this agent.
    #[serde(default = "default_context")]
    pub context: String,

    /// Frame separator character.
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Bound on TCP connect, TLS, and WebSocket handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Outbound fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Fetch settings (as read from JSON).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds. `None` waits indefinitely.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// User-Agent header; reqwest's default when unset.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Referer header sent with every fetch.
    #[serde(default)]
    pub referer: Option<String>,
}

impl FetchConfig {
    /// Create from environment variables.
    ///
    /// Reads `SCRAPE_FETCH_TIMEOUT` (seconds), `SCRAPE_USER_AGENT`, and
    /// `SCRAPE_REFERER`. Unset or unparsable values stay `None`.
    pub fn from_env() -> Self {
        Self {
            timeout_seconds: std::env::var("SCRAPE_FETCH_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
            user_agent: std::env::var("SCRAPE_USER_AGENT").ok(),
            referer: std::env::var("SCRAPE_REFERER").ok(),
        }
    }

    /// Fill unset fields from `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            timeout_seconds: self.timeout_seconds.or(fallback.timeout_seconds),
            user_agent: self.user_agent.or(fallback.user_agent),
            referer: self.referer.or(fallback.referer),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            context: default_context(),
            separator: DEFAULT_SEPARATOR,
            connect_timeout_seconds: default_connect_timeout(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    /// Codec for the configured separator.
    pub fn codec(&self) -> Result<Codec> {
        Codec::new(self.separator).context("Invalid frame separator")
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// The controller endpoint, or an error if none was configured.
    pub fn require_endpoint(&self) -> Result<&str> {
        self.endpoint
            .as_deref()
            .context("No controller endpoint configured (use --endpoint or the config file)")
    }
}

fn default_context() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

const fn default_separator() -> char {
    DEFAULT_SEPARATOR
}

const fn default_connect_timeout() -> u64 {
    30
}
