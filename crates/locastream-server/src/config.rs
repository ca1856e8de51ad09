//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML configuration file (`LOCASTREAM_CONFIG`, else `locastream.toml`
//!   and friends)
//! - Environment variables (`LOCASTREAM_HOST`, `LOCASTREAM_PORT`, and
//!   `LOCASTREAM__<SECTION>__<KEY>` for everything else)

use anyhow::{bail, Context, Result};
use locastream_core::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an explicit config file.
const CONFIG_ENV: &str = "LOCASTREAM_CONFIG";

/// Config file locations, searched in order.
const CONFIG_PATHS: [&str; 3] = [
    "locastream.toml",
    "/etc/locastream/locastream.toml",
    "~/.config/locastream/locastream.toml",
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

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Broadcast hub configuration.
    #[serde(default)]
    pub hub: HubSettings,

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
}

/// Broadcast hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Send each sample back to the producer that sent it.
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,

    /// Maximum payload size in bytes; larger payloads are ignored.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Close connections idle for this long (0 disables).
    #[serde(default)]
    pub read_timeout_ms: u64,

    /// Evict viewers whose send takes longer than this (0 disables).
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
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
    std::env::var("LOCASTREAM_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("LOCASTREAM_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_send_timeout() -> u64 {
    10_000 // 10 seconds
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
            hub: HubSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            max_message_size: default_max_message_size(),
            read_timeout_ms: 0,
            send_timeout_ms: default_send_timeout(),
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

impl HubSettings {
    /// Convert to the hub's own configuration type.
    #[must_use]
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            echo_to_sender: self.echo_to_sender,
            max_message_size: self.max_message_size,
            read_timeout: millis(self.read_timeout_ms),
            send_timeout: millis(self.send_timeout_ms),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Config {
    /// Load configuration from `LOCASTREAM_CONFIG` if set, otherwise from
    /// the first config file found, layered with `LOCASTREAM__*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, if
    /// `LOCASTREAM_CONFIG` names a missing file, or if an override has the
    /// wrong type.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        let mut builder = config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
                break;
            }
        }

        Self::build(builder)
    }

    /// Load configuration from a specific file, layered with `LOCASTREAM__*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }

        let builder = config::Config::builder().add_source(config::File::from(path));
        Self::build(builder)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        builder
            .add_source(
                config::Environment::with_prefix("LOCASTREAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert!(config.hub.echo_to_sender);
        assert_eq!(config.hub.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".to_string();
        config.port = 8080;
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        config.host = "not a host".to_string();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [hub]
            echo_to_sender = false
            read_timeout_ms = 30000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert!(!config.hub.echo_to_sender);
        assert_eq!(config.hub.read_timeout_ms, 30_000);
        assert_eq!(config.hub.send_timeout_ms, 10_000);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_from_file() {
        let path = std::env::temp_dir().join(format!("locastream-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 7000\n[transport]\nwebsocket_path = \"/live\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.transport.websocket_path, "/live");
        assert!(config.hub.echo_to_sender);
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let path = std::env::temp_dir().join(format!("locastream-env-{}.toml", std::process::id()));
        std::fs::write(&path, "[hub]\necho_to_sender = false\n").unwrap();

        std::env::set_var(CONFIG_ENV, &path);
        let loaded = Config::load();
        std::fs::remove_file(&path).unwrap();
        let missing = Config::load();
        std::env::remove_var(CONFIG_ENV);

        assert!(!loaded.unwrap().hub.echo_to_sender);
        assert!(missing.is_err());
    }

    #[test]
    fn test_layered_sources() {
        let builder = config::Config::builder().add_source(config::File::from_str(
            "[hub]\nmax_message_size = 1024\nsend_timeout_ms = 0\n",
            config::FileFormat::Toml,
        ));

        let config = Config::build(builder).unwrap();
        assert_eq!(config.hub.max_message_size, 1024);
        assert!(config.hub.echo_to_sender);

        let hub = config.hub.to_hub_config();
        assert_eq!(hub.max_message_size, 1024);
        assert_eq!(hub.send_timeout, None);
        assert_eq!(hub.read_timeout, None);
    }

    #[test]
    fn test_hub_config_conversion() {
        let settings = HubSettings {
            echo_to_sender: false,
            max_message_size: 512,
            read_timeout_ms: 1500,
            send_timeout_ms: 250,
        };

        let hub = settings.to_hub_config();
        assert!(!hub.echo_to_sender);
        assert_eq!(hub.read_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(hub.send_timeout, Some(Duration::from_millis(250)));
    }
}
