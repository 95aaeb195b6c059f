//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pre-flight check settings.
    pub check: CheckConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Tunables for one pre-flight check run.
///
/// Device choices are deliberately absent: the check is rebuilt fresh each
/// session and never persists a selected camera or microphone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Bounded wait per ladder attempt, in milliseconds. This is a local
    /// hardware/driver call, so the bound is independent of network latency.
    pub attempt_timeout_ms: u64,

    /// Endpoint for the reachability probe, as host:port.
    pub probe_endpoint: String,

    /// Give up on the reachability probe after this many milliseconds.
    pub probe_timeout_ms: u64,

    /// Connect latency at or above this is reported as a slow connection.
    pub slow_connection_ms: u64,

    /// Audio level meter sampling interval in milliseconds.
    pub meter_interval_ms: u64,

    /// Delay before enumerating devices after a negotiation finishes.
    /// Device labels are only reliably populated once a permission grant
    /// has settled.
    pub enumerate_settle_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "greenroom=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            check: CheckConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 15_000,
            probe_endpoint: "www.google.com:443".to_string(),
            probe_timeout_ms: 5_000,
            slow_connection_ms: 300,
            meter_interval_ms: 100,
            enumerate_settle_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl CheckConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn slow_connection(&self) -> Duration {
        Duration::from_millis(self.slow_connection_ms)
    }

    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms)
    }

    pub fn enumerate_settle(&self) -> Duration {
        Duration::from_millis(self.enumerate_settle_ms)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    ///
    /// `GREENROOM_PROBE_ENDPOINT` overrides the probe endpoint regardless
    /// of what the file says.
    pub fn load() -> Self {
        let config_path = config_file_path();
        let mut config = Self::default();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(parsed) => config = parsed,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        if let Ok(endpoint) = std::env::var("GREENROOM_PROBE_ENDPOINT") {
            if !endpoint.is_empty() {
                config.check.probe_endpoint = endpoint;
            }
        }
        config
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("greenroom").join("config.json")
}
