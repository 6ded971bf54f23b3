//! Configuration module for beast-bench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::protocols::http::{BODY_LIMIT, HEAD_LIMIT};
use crate::runtime::{default_threads, QUEUE_LIMIT};
use crate::server::MAX_CONNECTIONS;

/// Which side(s) of the benchmark this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Server,
    Client,
    Both,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "beast-bench")]
#[command(author = "beast-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "Pipelined HTTP server and keep-alive load generator", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run the server, the clients, or both
    #[arg(short, long, value_enum)]
    pub mode: Option<Mode>,

    /// Host to bind (server) and connect to (client)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind and connect to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Worker threads per context (defaults to number of CPU cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Total number of requests to complete
    #[arg(short = 'n', long)]
    pub requests: Option<u64>,

    /// Number of concurrent clients
    #[arg(short = 'C', long)]
    pub clients: Option<usize>,

    /// Request path sent by every client
    #[arg(long)]
    pub path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub bench: BenchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings shared by both roles
#[derive(Debug, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Worker threads per context
    pub threads: Option<usize>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            host: default_host(),
            port: default_port(),
            threads: None,
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Responses queued per connection before reads pause
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
    /// Maximum request head (request line plus headers) in bytes
    #[serde(default = "default_head_limit")]
    pub head_limit: usize,
    /// Maximum request body in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
    /// Idle timeout for each read and write, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            queue_limit: default_queue_limit(),
            head_limit: default_head_limit(),
            body_limit: default_body_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_requests")]
    pub requests: u64,
    #[serde(default = "default_clients")]
    pub clients: usize,
    #[serde(default = "default_path")]
    pub path: String,
    /// Timeout for connect, each write and each read, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            clients: default_clients(),
            path: default_path(),
            timeout_secs: default_timeout_secs(),
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

fn default_mode() -> Mode {
    Mode::Both
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5050
}

fn default_max_connections() -> usize {
    MAX_CONNECTIONS
}

fn default_queue_limit() -> usize {
    QUEUE_LIMIT
}

fn default_head_limit() -> usize {
    HEAD_LIMIT
}

fn default_body_limit() -> usize {
    BODY_LIMIT
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_requests() -> u64 {
    100_000
}

fn default_clients() -> usize {
    64
}

fn default_path() -> String {
    "/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub host: String,
    pub port: u16,
    pub threads: usize,
    pub requests: u64,
    pub clients: usize,
    pub path: String,
    pub max_connections: usize,
    pub queue_limit: usize,
    pub head_limit: usize,
    pub body_limit: usize,
    pub server_timeout: Duration,
    pub client_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
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

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            mode: cli.mode.unwrap_or(toml_config.bench.mode),
            host: cli.host.unwrap_or(toml_config.bench.host),
            port: cli.port.unwrap_or(toml_config.bench.port),
            threads: cli
                .threads
                .or(toml_config.bench.threads)
                .unwrap_or_else(default_threads),
            requests: cli.requests.unwrap_or(toml_config.client.requests),
            clients: cli.clients.unwrap_or(toml_config.client.clients),
            path: cli.path.unwrap_or(toml_config.client.path),
            max_connections: toml_config.server.max_connections,
            queue_limit: toml_config.server.queue_limit,
            head_limit: toml_config.server.head_limit,
            body_limit: toml_config.server.body_limit,
            server_timeout: Duration::from_secs(toml_config.server.timeout_secs),
            client_timeout: Duration::from_secs(toml_config.client.timeout_secs),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("threads", self.threads as u64),
            ("requests", self.requests),
            ("clients", self.clients as u64),
            ("max_connections", self.max_connections as u64),
            ("queue_limit", self.queue_limit as u64),
            ("head_limit", self.head_limit as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
