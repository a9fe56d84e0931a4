//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`chorus.toml`, `/etc/chorus/chorus.toml` or
//!   `~/.config/chorus/chorus.toml`)
//! - Environment variables (`CHORUS__PORT`, `CHORUS__LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{bail, Context, Result};
use chorus_core::{AdapterConfig, HubConfig};
use chorus_protocol::WireFormat;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Files searched by [`Config::load`], first match wins.
const CONFIG_PATHS: [&str; 3] = [
    "chorus.toml",
    "/etc/chorus/chorus.toml",
    "~/.config/chorus/chorus.toml",
];

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "CHORUS";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Outbound format when the client does not ask for one.
    #[serde(default)]
    pub default_format: WireFormat,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum chat message length in bytes.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Frames buffered per connection before it counts as slow.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Requests buffered in front of the hub.
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,

    /// Maximum rooms per connection.
    #[serde(default = "default_max_rooms")]
    pub max_rooms_per_connection: usize,

    /// Sustained chat and typing frames per second, per connection.
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,

    /// Burst allowance above `messages_per_second`.
    #[serde(default = "default_message_burst")]
    pub message_burst: u32,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
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

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_frame_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_content_length() -> usize {
    4096
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_hub_queue_capacity() -> usize {
    4096
}

fn default_max_rooms() -> usize {
    100
}

fn default_messages_per_second() -> u32 {
    10
}

fn default_message_burst() -> u32 {
    20
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
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
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            default_format: WireFormat::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
            max_content_length: default_max_content_length(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            hub_queue_capacity: default_hub_queue_capacity(),
            max_rooms_per_connection: default_max_rooms(),
            messages_per_second: default_messages_per_second(),
            message_burst: default_message_burst(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
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
    /// Load configuration from the first config file found, then apply
    /// `CHORUS__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::layered(path.as_deref())
    }

    /// Load configuration from a specific file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result is
    /// invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        Self::layered(path.to_str())
    }

    fn layered(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::new(path, ::config::FileFormat::Toml));
        }
        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path.unwrap_or("environment")))?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file only.
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

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_ms == 0 {
            bail!("heartbeat.interval_ms must be positive");
        }
        if self.heartbeat.interval_ms >= self.heartbeat.timeout_ms {
            bail!(
                "heartbeat.interval_ms ({}) must be shorter than heartbeat.timeout_ms ({})",
                self.heartbeat.interval_ms,
                self.heartbeat.timeout_ms
            );
        }
        if self.limits.outbound_queue_capacity == 0 || self.limits.hub_queue_capacity == 0 {
            bail!("queue capacities must be positive");
        }
        if self.limits.max_content_length > self.limits.max_frame_size {
            bail!("limits.max_content_length must not exceed limits.max_frame_size");
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!("transport.websocket_path must start with '/'");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            request_capacity: self.limits.hub_queue_capacity,
            max_rooms_per_connection: self.limits.max_rooms_per_connection,
            ..HubConfig::default()
        }
    }

    /// Per-connection settings.
    #[must_use]
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            max_frame_size: self.limits.max_frame_size,
            max_content_length: self.limits.max_content_length,
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            read_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            outbound_capacity: self.limits.outbound_queue_capacity,
            messages_per_second: self.limits.messages_per_second,
            message_burst: self.limits.message_burst,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.transport.default_format, WireFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let config = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            default_format = "msgpack"

            [limits]
            max_connections = 50000
            messages_per_second = 5
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.transport.default_format, WireFormat::MessagePack);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.messages_per_second, 5);
        assert_eq!(config.limits.message_burst, 20);
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_timeout() {
        let mut config = Config::default();
        config.heartbeat.interval_ms = 60_000;
        config.heartbeat.timeout_ms = 30_000;
        assert!(config.validate().is_err());

        config.heartbeat.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_validates() {
        let dir = std::env::temp_dir().join(format!("chorus-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chorus.toml");
        std::fs::write(&path, "[heartbeat]\ninterval_ms = 5000\ntimeout_ms = 1000\n").unwrap();

        assert!(Config::from_file(&path).is_err());
        assert!(Config::load_from(&path).is_err());
        assert!(Config::load_from(dir.join("missing.toml")).is_err());

        std::fs::write(&path, "port = 7000\n").unwrap();
        assert_eq!(Config::from_file(&path).unwrap().port, 7000);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_core_configs() {
        let mut config = Config::default();
        config.heartbeat.interval_ms = 1_500;
        config.limits.max_rooms_per_connection = 7;

        let adapter = config.adapter_config();
        assert_eq!(adapter.heartbeat_interval, Duration::from_millis(1_500));
        assert_eq!(adapter.read_timeout, Duration::from_secs(60));
        assert_eq!(config.hub_config().max_rooms_per_connection, 7);
    }
}
