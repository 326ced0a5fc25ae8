//! Server configuration.
//!
//! Configuration is layered from:
//! - Built-in defaults
//! - A TOML file (`tether.toml`, `/etc/tether/tether.toml` or
//!   `~/.config/tether/tether.toml`, first one found)
//! - Environment variables (`TETHER_*`, nested keys joined with `__`)
//!
//! `TETHER_CONFIG=/path/to/file.toml` skips the layering and reads exactly
//! that file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tether_core::BridgeConfig;
use tether_protocol::Encoding;
use tether_transport::WebSocketConfig;

/// Default config file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "tether.toml",
    "/etc/tether/tether.toml",
    "~/.config/tether/tether.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstream and consumer socket settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Per-session bridge settings.
    #[serde(default)]
    pub bridge: BridgeSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path consumers connect to.
    #[serde(default = "default_ws_path")]
    pub path: String,

    /// Encoding spoken to upstream servers.
    #[serde(default)]
    pub encoding: Encoding,

    /// Maximum upstream message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSection {
    /// Reply timeout for joins, leaves and pushes, in milliseconds.
    #[serde(default = "default_push_timeout")]
    pub push_timeout_ms: u64,

    /// Upstream heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Commands a session may queue before backpressure.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4040
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/bridge".to_string()
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_push_timeout() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_command_capacity() -> usize {
    256
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            bridge: BridgeSection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path: default_ws_path(),
            encoding: Encoding::default(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            push_timeout_ms: default_push_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            command_capacity: default_command_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first file found, with environment
    /// overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value has the
    /// wrong type.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("TETHER_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).into_owned());
        }

        let mut builder = ::config::Config::builder();

        let found = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());
        if let Some(path) = &found {
            tracing::info!(path = %path, "Using config file");
            builder = builder.add_source(::config::File::from(Path::new(path)));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("TETHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file, without environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form an address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Settings for each session's bridge.
    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            push_timeout: Duration::from_millis(self.bridge.push_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.bridge.heartbeat_interval_ms),
            command_capacity: self.bridge.command_capacity,
        }
    }

    /// Settings for upstream sockets.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: self.transport.max_message_size,
            encoding: self.transport.encoding,
            ..WebSocketConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 4040);
        assert_eq!(config.transport.path, "/bridge");
        assert_eq!(config.transport.encoding, Encoding::Json);
        assert_eq!(config.bridge_config().push_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 4040);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            encoding = "msgpack"

            [bridge]
            push_timeout_ms = 2500
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.websocket_config().encoding, Encoding::Msgpack);
        assert_eq!(config.bridge_config().push_timeout, Duration::from_millis(2500));
        assert_eq!(config.bridge.command_capacity, 256);
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let err = Config::from_file("/nonexistent/tether.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
