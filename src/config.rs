//! # Configuration Management
//!
//! Centralized configuration for the WebSocket event server.
//!
//! This module provides the configuration record a `Server` is constructed
//! from: the listening endpoint, the keep-alive policy and a handful of
//! engine limits, plus the logging settings used by the demo and embedders.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment variables via `from_env()`
//!
//! ## Keep-Alive
//! A connection idle for `keep_alive_time` seconds is probed every
//! `keep_alive_interval` seconds; after `keep_alive_retry` unanswered probes
//! it is closed and reported as a normal disconnection.

use crate::error::{ServerError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default endpoint path
pub const DEFAULT_PATH: &str = "/";

/// Max allowed message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Time allowed for a client to complete the upgrade handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Time `Server::shutdown` waits for the engine to drain
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Server endpoint and keep-alive settings
    #[serde(default)]
    pub server: ServerOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| {
            ServerError::ConfigurationError(format!("Failed to open config file: {e}"))
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| {
            ServerError::ConfigurationError(format!("Failed to read config file: {e}"))
        })?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ServerError::ConfigurationError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("WS_SERVER_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("WS_SERVER_PORT") {
            config.server.port = parse_env("WS_SERVER_PORT", &port)?;
        }

        if let Ok(path) = std::env::var("WS_SERVER_PATH") {
            config.server.path = path;
        }

        if let Ok(time) = std::env::var("WS_SERVER_KEEP_ALIVE_TIME") {
            config.server.keep_alive_time = parse_env("WS_SERVER_KEEP_ALIVE_TIME", &time)?;
        }

        if let Ok(interval) = std::env::var("WS_SERVER_KEEP_ALIVE_INTERVAL") {
            config.server.keep_alive_interval =
                parse_env("WS_SERVER_KEEP_ALIVE_INTERVAL", &interval)?;
        }

        if let Ok(retry) = std::env::var("WS_SERVER_KEEP_ALIVE_RETRY") {
            config.server.keep_alive_retry = parse_env("WS_SERVER_KEEP_ALIVE_RETRY", &retry)?;
        }

        if let Ok(level) = std::env::var("WS_SERVER_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ServerError::ConfigurationError(format!("Invalid log level: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            ServerError::ConfigurationError(format!("Failed to serialize config: {e}"))
        })?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.server.validate();
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        fold_errors(self.validate())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        ServerError::ConfigurationError(format!("Invalid value for {name}: '{value}'"))
    })
}

fn fold_errors(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServerError::ConfigurationError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

/// The configuration record a `Server` is constructed from
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerOptions {
    /// Interface to bind (e.g. "0.0.0.0")
    pub host: String,

    /// Listen port
    pub port: u16,

    /// URL path the endpoint accepts upgrades on (e.g. "/ws")
    pub path: String,

    /// Seconds of peer inactivity before the first probe
    pub keep_alive_time: u64,

    /// Seconds between probes
    pub keep_alive_interval: u64,

    /// Unanswered probes before the peer is declared dead
    pub keep_alive_retry: u32,

    /// Largest message accepted from a peer, in bytes
    pub max_message_size: usize,

    /// Seconds a client has to complete the upgrade handshake
    pub handshake_timeout: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: DEFAULT_PORT,
            path: String::from(DEFAULT_PATH),
            keep_alive_time: 60,
            keep_alive_interval: 10,
            keep_alive_retry: 3,
            max_message_size: MAX_MESSAGE_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl ServerOptions {
    /// Options for `port` and `path` with the given keep-alive policy
    pub fn new(
        port: u16,
        path: impl Into<String>,
        keep_alive_time: u64,
        keep_alive_interval: u64,
        keep_alive_retry: u32,
    ) -> Self {
        Self {
            port,
            path: path.into(),
            keep_alive_time,
            keep_alive_interval,
            keep_alive_retry,
            ..Self::default()
        }
    }

    /// Override the bind host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// The keep-alive policy as durations
    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive {
            time: Duration::from_secs(self.keep_alive_time),
            interval: Duration::from_secs(self.keep_alive_interval),
            retries: self.keep_alive_retry,
        }
    }

    /// Handshake timeout as a duration
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    /// Address string for the listener
    pub fn bind_address(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// Validate server options
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Server host cannot be empty".to_string());
        } else if self.host.parse::<IpAddr>().is_err() {
            errors.push(format!(
                "Invalid server host: '{}' (expected an IP address such as '0.0.0.0')",
                self.host
            ));
        }

        if self.port == 0 {
            errors.push("Port must be in range 1-65535".to_string());
        }

        if let Some(problem) = path_problem(&self.path) {
            errors.push(problem);
        }

        if self.keep_alive_time == 0 {
            errors.push("Keep-alive time must be greater than 0".to_string());
        } else if self.keep_alive_time > 7200 {
            errors.push("Keep-alive time too long (maximum: 2 hours)".to_string());
        }

        if self.keep_alive_interval == 0 {
            errors.push("Keep-alive interval must be greater than 0".to_string());
        } else if self.keep_alive_interval > 600 {
            errors.push("Keep-alive interval too long (maximum: 600s)".to_string());
        }

        if self.keep_alive_retry == 0 {
            errors.push("Keep-alive retry count must be greater than 0".to_string());
        } else if self.keep_alive_retry > 100 {
            errors.push(format!(
                "Keep-alive retry count too large: {} (maximum: 100)",
                self.keep_alive_retry
            ));
        }

        if self.max_message_size < 1024 {
            errors.push("Max message size too small (minimum: 1 KB)".to_string());
        } else if self.max_message_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max message size too large: {} bytes (maximum: 100 MB)",
                self.max_message_size
            ));
        }

        if self.handshake_timeout == 0 {
            errors.push("Handshake timeout must be greater than 0".to_string());
        } else if self.handshake_timeout > 120 {
            errors.push("Handshake timeout too long (maximum: 120s)".to_string());
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        fold_errors(self.validate())
    }
}

fn path_problem(path: &str) -> Option<String> {
    if path.is_empty() {
        Some("Path cannot be empty".to_string())
    } else if !path.starts_with('/') {
        Some(format!("Path must start with '/': '{path}'"))
    } else if path.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some(format!("Path contains whitespace or control characters: '{path}'"))
    } else if path.contains('?') || path.contains('#') {
        Some(format!("Path must not contain a query or fragment: '{path}'"))
    } else {
        None
    }
}

/// Keep-alive policy applied to each connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Idle time before the first probe
    pub time: Duration,
    /// Spacing between probes
    pub interval: Duration,
    /// Unanswered probes tolerated
    pub retries: u32,
}

impl KeepAlive {
    /// Total silence after which the peer is declared dead
    pub fn dead_after(&self) -> Duration {
        self.time + self.interval * self.retries
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("ws-event-server"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
