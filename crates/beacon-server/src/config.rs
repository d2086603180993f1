//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BEACON_*)
//! - TOML configuration file
//! - A file named by `BEACON_CONFIG`

use anyhow::{bail, Context, Result};
use beacon_core::{DispatcherConfig, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Stream endpoint configuration.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Cross-origin policy.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Stream endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Path of the stream endpoint.
    #[serde(default = "default_stream_path")]
    pub path: String,

    /// Keepalive interval in milliseconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,

    /// Deadline for the `connected` handshake in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Flushed chunks buffered per stream before writers wait.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Deadline for a whole send operation in milliseconds.
    #[serde(default = "default_broadcast_timeout")]
    pub broadcast_timeout_ms: u64,
}

/// Cross-origin configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
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

/// Candidate config files, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "beacon.toml",
    "/etc/beacon/beacon.toml",
    "~/.config/beacon/beacon.toml",
];

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_stream_path() -> String {
    "/api/sse/connect".to_string()
}

fn default_keepalive_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_handshake_timeout() -> u64 {
    2_000 // 2 seconds
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_connections() -> usize {
    10_000
}

fn default_broadcast_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stream: StreamConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            path: default_stream_path(),
            keepalive_interval_ms: default_keepalive_interval(),
            handshake_timeout_ms: default_handshake_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            broadcast_timeout_ms: default_broadcast_timeout(),
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
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("BEACON_CONFIG") {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        Self::load_first(&CONFIG_PATHS, Self::default())
    }

    /// Load the first file in `paths` that exists, or fall back to `fallback`.
    ///
    /// Both outcomes are validated.
    fn load_first(paths: &[&str], fallback: Self) -> Result<Self> {
        for path in paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        fallback
            .validate()
            .context("Invalid configuration from environment")?;
        Ok(fallback)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check values that would otherwise fail at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !self.stream.path.starts_with('/') {
            bail!("stream.path must start with '/': {}", self.stream.path);
        }
        if self.stream.keepalive_interval_ms == 0 {
            bail!("stream.keepalive_interval_ms must be greater than zero");
        }
        if self.limits.max_connections == 0 {
            bail!("limits.max_connections must be greater than zero");
        }
        self.bind_addr()?;
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Keepalive interval.
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.stream.keepalive_interval_ms)
    }

    /// Handshake deadline.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.stream.handshake_timeout_ms)
    }

    /// Registry settings derived from this configuration.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_connections: self.limits.max_connections,
        }
    }

    /// Dispatcher settings derived from this configuration.
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            broadcast_timeout: Duration::from_millis(self.limits.broadcast_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stream.path, "/api/sse/connect");
        assert_eq!(config.limits.max_connections, 10_000);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(10));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(2));
        assert_eq!(
            config.dispatcher_config().broadcast_timeout,
            Duration::from_secs(5)
        );
        assert!(config.cors.allowed_origins.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 500

            [stream]
            keepalive_interval_ms = 15000

            [cors]
            allowed_origins = ["https://console.example.com"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.registry_config().max_connections, 500);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(15));
        assert_eq!(config.stream.path, "/api/sse/connect");
        assert_eq!(config.limits.broadcast_timeout_ms, 5_000);
        assert_eq!(config.cors.allowed_origins.len(), 1);
    }

    #[test]
    fn test_invalid_stream_path() {
        let mut config = Config::default();
        config.stream.path = "events".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fallback_is_validated() {
        let missing = ["/nonexistent/beacon/beacon.toml"];

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(Config::load_first(&missing, bad).is_err());

        let mut zero = Config::default();
        zero.limits.max_connections = 0;
        assert!(Config::load_first(&missing, zero).is_err());

        let config = Config::load_first(&missing, Config::default()).unwrap();
        assert_eq!(config.stream.path, "/api/sse/connect");
    }

    #[test]
    fn test_existing_file_wins_over_fallback() {
        let path = std::env::temp_dir().join(format!("beacon-{}.toml", std::process::id()));
        std::fs::write(&path, "host = \"127.0.0.1\"\nport = 9100\n").unwrap();

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        let loaded = Config::load_first(&[path.to_str().unwrap()], bad);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.unwrap().port, 9100);
    }
}
