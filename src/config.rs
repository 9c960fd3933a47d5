//! Server configuration.

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Configuration for the synchronization server.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    host: String,

    /// Port to bind to.
    #[serde(default = "default_port")]
    port: u16,

    /// Seconds a player has to move before their turn is skipped.
    #[serde(default = "default_turn_timeout_secs")]
    turn_timeout_secs: u64,

    /// Client poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,

    /// Seconds a settled match stays readable before eviction.
    #[serde(default = "default_eviction_grace_secs")]
    eviction_grace_secs: u64,

    /// Seconds between eviction sweeps.
    #[serde(default = "default_reaper_interval_secs")]
    reaper_interval_secs: u64,

    /// Whether `DELETE /api/matches/{id}/moves` is served.
    #[serde(default)]
    debug_reset: bool,

    /// URL receiving terminal notifications. Logged only when unset.
    #[serde(default)]
    payout_webhook: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_turn_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_eviction_grace_secs() -> u64 {
    300
}

fn default_reaper_interval_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            turn_timeout_secs: default_turn_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            eviction_grace_secs: default_eviction_grace_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            debug_reset: false,
            payout_webhook: None,
        }
    }
}

impl SyncConfig {
    /// Loads configuration from a TOML file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        info!(port = config.port, turn_timeout_secs = config.turn_timeout_secs, "Config loaded");
        Ok(config)
    }

    /// Applies `STAKED_*` environment overrides.
    #[instrument(skip(self))]
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(host) = std::env::var("STAKED_HOST") {
            self.host = host;
        }
        if let Some(port) = env_number("STAKED_PORT")? {
            self.port = port;
        }
        if let Some(secs) = env_number("STAKED_TURN_TIMEOUT_SECS")? {
            self.turn_timeout_secs = secs;
        }
        if let Some(ms) = env_number("STAKED_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = ms;
        }
        if let Some(grace) = env_number("STAKED_EVICTION_GRACE_SECS")? {
            self.eviction_grace_secs = grace;
        }
        if let Ok(url) = std::env::var("STAKED_PAYOUT_WEBHOOK") {
            self.payout_webhook = Some(url);
        }
        if let Ok(flag) = std::env::var("STAKED_DEBUG_RESET") {
            self.debug_reset = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        self.validate()?;
        Ok(self)
    }

    /// Overrides the bind address.
    pub fn with_bind(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Overrides the turn timeout.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout_secs = timeout.as_secs();
        self
    }

    /// Enables or disables the debug reset route.
    pub fn with_debug_reset(mut self, enabled: bool) -> Self {
        self.debug_reset = enabled;
        self
    }

    /// Turn timeout as a duration.
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    /// Client poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Eviction grace period as a duration.
    pub fn eviction_grace(&self) -> Duration {
        Duration::from_secs(self.eviction_grace_secs)
    }

    /// Reaper sweep interval as a duration.
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    /// Checks that intervals are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turn_timeout_secs == 0 {
            return Err(ConfigError::new("turn_timeout_secs must be positive".to_string()));
        }
        if self.reaper_interval_secs == 0 {
            return Err(ConfigError::new("reaper_interval_secs must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::new("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::new(format!("{} is not a valid number: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}
