//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::realtime::{DispatcherConfig, SupervisorConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend location
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base HTTP(S) URL of the fleet backend
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Real-time channel tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_backoff_step")]
    pub backoff_step_ms: u64,

    /// 0 disables keepalive pings
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_backoff_step() -> u64 {
    2000 // attempt n waits n * 2s
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    256
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_path: default_ws_path(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff_step_ms: default_backoff_step(),
            keepalive_interval_secs: default_keepalive_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl RealtimeConfig {
    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            backoff_step: Duration::from_millis(self.backoff_step_ms),
            keepalive_interval: match self.keepalive_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            ws_path: self.ws_path.clone(),
            ..SupervisorConfig::default()
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            broadcast_capacity: self.event_buffer.max(1),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Supplies the backend base URL at connect time
pub trait BaseUrlProvider {
    fn base_url(&self) -> String;
}

impl BaseUrlProvider for Config {
    fn base_url(&self) -> String {
        self.server.base_url.clone()
    }
}

impl BaseUrlProvider for ServerConfig {
    fn base_url(&self) -> String {
        self.base_url.clone()
    }
}

impl BaseUrlProvider for str {
    fn base_url(&self) -> String {
        self.to_string()
    }
}

impl BaseUrlProvider for String {
    fn base_url(&self) -> String {
        self.clone()
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("fleetwatch").join("config.toml")),
            Some(PathBuf::from("/etc/fleetwatch/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("FLEETWATCH_BASE_URL") {
            self.server.base_url = url;
        }

        if let Some(attempts) = var("FLEETWATCH_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.realtime.max_reconnect_attempts = n;
            }
        }
        if let Some(step) = var("FLEETWATCH_BACKOFF_STEP_MS") {
            if let Ok(ms) = step.parse() {
                self.realtime.backoff_step_ms = ms;
            }
        }
        if let Some(keepalive) = var("FLEETWATCH_KEEPALIVE_SECS") {
            if let Ok(secs) = keepalive.parse() {
                self.realtime.keepalive_interval_secs = secs;
            }
        }

        if let Some(level) = var("FLEETWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("FLEETWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Fleetwatch Configuration
#
# Environment variables override these settings:
# - FLEETWATCH_BASE_URL
# - FLEETWATCH_MAX_RECONNECT_ATTEMPTS
# - FLEETWATCH_BACKOFF_STEP_MS
# - FLEETWATCH_KEEPALIVE_SECS
# - FLEETWATCH_LOG_LEVEL
# - FLEETWATCH_LOG_FORMAT

[server]
# Base URL of the fleet backend; the WebSocket endpoint is derived from it
# (http -> ws, https -> wss, path /ws appended)
base_url = "http://localhost:8000"

[realtime]
# Path appended to the base URL
ws_path = "/ws"

# Automatic reconnects after a failure before giving up
max_reconnect_attempts = 5

# Reconnect attempt n waits n * backoff_step_ms
backoff_step_ms = 2000

# Keepalive ping interval in seconds (0 disables)
keepalive_interval_secs = 30

# Buffered events per stream subscriber
event_buffer = 256

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.base_url, "http://localhost:8000");
        assert_eq!(config.realtime.max_reconnect_attempts, 5);

        let supervisor = config.realtime.supervisor();
        assert_eq!(supervisor.backoff_step, Duration::from_secs(2));
        assert_eq!(supervisor.keepalive_interval, Some(Duration::from_secs(30)));
        assert_eq!(supervisor.ws_path, "/ws");
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.server.base_url, default_base_url());
        assert_eq!(config.realtime.backoff_step_ms, 2000);
        assert_eq!(config.realtime.keepalive_interval_secs, 30);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nbase_url = \"https://fleet.example.com\"\n\n[realtime]\nkeepalive_interval_secs = 0"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.base_url(), "https://fleet.example.com");
        assert_eq!(config.realtime.max_reconnect_attempts, 5);
        assert_eq!(config.realtime.supervisor().keepalive_interval, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbase_url = ").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FLEETWATCH_BASE_URL", "http://10.0.0.5:8000"),
            ("FLEETWATCH_MAX_RECONNECT_ATTEMPTS", "3"),
            ("FLEETWATCH_BACKOFF_STEP_MS", "not-a-number"),
            ("FLEETWATCH_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.base_url, "http://10.0.0.5:8000");
        assert_eq!(config.realtime.max_reconnect_attempts, 3);
        assert_eq!(config.realtime.backoff_step_ms, 2000);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_base_url_providers() {
        assert_eq!("http://a".base_url(), "http://a");
        assert_eq!(String::from("http://b").base_url(), "http://b");
        assert_eq!(ServerConfig::default().base_url(), "http://localhost:8000");
    }
}
