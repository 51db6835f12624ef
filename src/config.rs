//! Configuration module for the gateway.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the gateway
#[derive(Parser, Debug)]
#[command(name = "ws-gateway")]
#[command(author = "ws-gateway authors")]
#[command(version = "0.1.0")]
#[command(about = "WebSocket gateway for a length-prefixed JSON backend", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to accept WebSocket clients on (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Backend server host
    #[arg(long)]
    pub backend_host: Option<String>,

    /// Backend server port
    #[arg(short = 'b', long)]
    pub backend_port: Option<u16>,

    /// Maximum number of concurrent client sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Client-facing listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events fetched per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            event_capacity: default_event_capacity(),
            backlog: default_backlog(),
        }
    }
}

/// Backend connection configuration
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    /// Upper bound on the synchronous connect, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Per-connection resource limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Largest WebSocket message (after reassembly) accepted from a client
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Largest amount of unsent output tolerated per connection
    #[serde(default = "default_max_pending_write")]
    pub max_pending_write: usize,
    /// How long an incomplete frame or envelope may sit without new bytes
    #[serde(default = "default_partial_timeout_ms")]
    pub partial_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_pending_write: default_max_pending_write(),
            partial_timeout_ms: default_partial_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_event_capacity() -> usize {
    1024
}

fn default_backlog() -> i32 {
    1024
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    8888
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_max_pending_write() -> usize {
    8 * 1024 * 1024 // 8 MB
}

fn default_partial_timeout_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub event_capacity: usize,
    pub backlog: i32,
    pub backend_host: String,
    pub backend_port: u16,
    pub connect_timeout: Duration,
    pub max_message_size: usize,
    pub max_pending_write: usize,
    pub partial_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values.
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        Ok(Config {
            listen,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            event_capacity: toml_config.server.event_capacity,
            backlog: toml_config.server.backlog,
            backend_host: cli.backend_host.unwrap_or(toml_config.backend.host),
            backend_port: cli.backend_port.unwrap_or(toml_config.backend.port),
            connect_timeout: Duration::from_millis(toml_config.backend.connect_timeout_ms),
            max_message_size: toml_config.limits.max_message_size,
            max_pending_write: toml_config.limits.max_pending_write,
            partial_timeout: Duration::from_millis(toml_config.limits.partial_timeout_ms),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

#[cfg(test)]
impl Config {
    /// Defaults bound to an ephemeral loopback port.
    pub fn for_tests(backend_port: u16) -> Self {
        let mut config = Self::merge(
            CliArgs::parse_from(["ws-gateway", "--listen", "127.0.0.1:0"]),
            TomlConfig::default(),
        )
        .expect("default config is valid");
        config.backend_port = backend_port;
        config
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
}
