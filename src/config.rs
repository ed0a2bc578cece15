//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::hub::{HubConfig, DEFAULT_UPDATE_RATE};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub schemas: SchemaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name shown to observers; defaults to the host name
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_title() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "topicboard".to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            title: default_title(),
        }
    }
}

/// Hub timing and limits
#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_ms: u64,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_update_rate")]
    pub default_update_rate: f64,

    /// Upper bound on client-requested rates (Hz); unbounded when unset
    #[serde(default)]
    pub max_update_rate: Option<f64>,

    #[serde(default = "default_latency_warn")]
    pub latency_warn_ms: u64,

    #[serde(default = "default_latency_close")]
    pub latency_close_ms: u64,

    #[serde(default = "default_publish_settle")]
    pub publish_settle_ms: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

fn default_reconcile_interval() -> u64 {
    1000
}

fn default_ping_interval() -> u64 {
    5000
}

fn default_update_rate() -> f64 {
    DEFAULT_UPDATE_RATE
}

fn default_latency_warn() -> u64 {
    1000
}

fn default_latency_close() -> u64 {
    10000
}

fn default_publish_settle() -> u64 {
    50
}

fn default_max_connections() -> usize {
    1000
}

fn default_feed_capacity() -> usize {
    64
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: default_reconcile_interval(),
            ping_interval_ms: default_ping_interval(),
            default_update_rate: default_update_rate(),
            max_update_rate: None,
            latency_warn_ms: default_latency_warn(),
            latency_close_ms: default_latency_close(),
            publish_settle_ms: default_publish_settle(),
            max_connections: default_max_connections(),
            feed_capacity: default_feed_capacity(),
        }
    }
}

/// Extra schema files to load at startup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
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

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
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
            dirs::config_dir().map(|p| p.join("topicboard").join("config.toml")),
            Some(PathBuf::from("/etc/topicboard/config.toml")),
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

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("TOPICBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TOPICBOARD_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Some(title) = lookup("TOPICBOARD_TITLE") {
            self.server.title = title;
        }

        if let Some(level) = lookup("TOPICBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TOPICBOARD_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Hub configuration derived from these settings
    pub fn hub_config(&self) -> HubConfig {
        let hub = &self.hub;
        HubConfig {
            title: self.server.title.clone(),
            reconcile_interval: Duration::from_millis(hub.reconcile_interval_ms.max(1)),
            ping_interval: Duration::from_millis(hub.ping_interval_ms.max(1)),
            default_update_rate: hub.default_update_rate,
            max_update_rate: hub.max_update_rate,
            latency_warn: Duration::from_millis(hub.latency_warn_ms),
            latency_close: Duration::from_millis(hub.latency_close_ms),
            publish_settle: Duration::from_millis(hub.publish_settle_ms),
            max_connections: hub.max_connections,
            feed_capacity: hub.feed_capacity.max(1),
        }
    }

    /// HTTP listener configuration derived from these settings
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(self.server.host.clone(), self.server.port)
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
    r#"# topicboard Configuration
#
# Environment variables override these settings:
# - TOPICBOARD_HOST
# - TOPICBOARD_PORT
# - TOPICBOARD_TITLE
# - TOPICBOARD_LOG_LEVEL
# - TOPICBOARD_LOG_FORMAT

[server]
# Address to listen on
host = "0.0.0.0"

# Port to listen on
port = 8888

# Name shown to observers (defaults to the host name)
# title = "my-robot"

[hub]
# How often interest is reconciled with upstream subscriptions (ms)
reconcile_interval_ms = 1000

# How often connections are pinged (ms)
ping_interval_ms = 5000

# Rate used when a client requests none (Hz)
default_update_rate = 24.0

# Upper bound on client-requested rates (Hz)
# max_update_rate = 60.0

# Latency above which a warning is logged (ms)
latency_warn_ms = 1000

# Latency above which a connection is closed (ms)
latency_close_ms = 10000

# Delay after advertising a topic before its first publish (ms)
publish_settle_ms = 50

# Maximum concurrent observer connections
max_connections = 1000

# Buffered messages per upstream feed
feed_capacity = 64

[schemas]
# JSON schema files to load at startup
paths = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
