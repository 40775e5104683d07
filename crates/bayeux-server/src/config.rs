//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BAYEUX_HOST, BAYEUX_PORT)
//! - TOML configuration file
//! - `--config <path>` on the command line

use anyhow::{Context, Result};
use bayeux_core::EngineConfig;
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

    /// Path of the Bayeux endpoint.
    #[serde(default = "default_path")]
    pub path: String,

    /// Protocol engine configuration.
    #[serde(default)]
    pub engine: EngineSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Protocol engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Protocol version reported to clients.
    #[serde(default = "default_version")]
    pub version: String,

    /// Connection types advertised by the handshake.
    #[serde(default = "default_connection_types")]
    pub connection_types: Vec<String>,

    /// Long-poll hold time in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Advised reconnect interval in milliseconds.
    #[serde(default)]
    pub interval_ms: u64,
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
    std::env::var("BAYEUX_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BAYEUX_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000)
}

fn default_path() -> String {
    "/bayeux".to_string()
}

fn default_version() -> String {
    EngineConfig::default().version
}

fn default_connection_types() -> Vec<String> {
    EngineConfig::default().connection_types
}

fn default_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            engine: EngineSection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            version: default_version(),
            connection_types: default_connection_types(),
            timeout_ms: default_timeout(),
            interval_ms: 0,
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

impl EngineSection {
    /// Build the engine configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            version: self.version.clone(),
            connection_types: self.connection_types.clone(),
            poll_timeout: Duration::from_millis(self.timeout_ms),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "bayeux.toml",
            "/etc/bayeux/bayeux.toml",
            "~/.config/bayeux/bayeux.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
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
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.path, "/bayeux");
        assert_eq!(config.engine.timeout_ms, 60_000);
        assert!(config
            .engine
            .connection_types
            .contains(&"long-polling".to_string()));
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [engine]
            timeout_ms = 25000
            connection_types = ["long-polling"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.engine.version, "1.0");

        let engine = config.engine.engine_config();
        assert_eq!(engine.poll_timeout, Duration::from_secs(25));
        assert_eq!(engine.connection_types, vec!["long-polling".to_string()]);
        assert_eq!(engine.interval, Duration::ZERO);
    }

    #[test]
    fn test_config_bind_addr() {
        let config: Config = toml::from_str("host = \"127.0.0.1\"\nport = 8123").unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 8123);

        let config: Config = toml::from_str("host = \"not a host\"").unwrap();
        assert!(config.bind_addr().is_err());
    }
}
