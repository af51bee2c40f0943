//! Configuration module for the photo-drop server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the photo server
#[derive(Parser, Debug, Default)]
#[command(name = "photo-drop")]
#[command(author = "photo-drop authors")]
#[command(version = "0.1.0")]
#[command(about = "Receives length-prefixed photos over TCP and stores them by day", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Base directory; photos land in <data-dir>/data/YYYY-MM-DD/
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Maximum number of concurrently handled connections (unbounded if unset)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Largest accepted declared payload size in bytes (unbounded if unset)
    #[arg(long)]
    pub max_payload: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Concurrent connection cap
    pub max_connections: Option<usize>,
    /// Declared payload size cap
    pub max_payload: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: None,
            max_payload: None,
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Base directory holding the `data/` tree
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5001
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: Option<usize>,
    pub max_payload: Option<u32>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
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

        Self::merge(cli, toml_config).validate()
    }

    /// Reject values the server cannot run with.
    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_connections == Some(0) {
            return Err(ConfigError::InvalidValue(
                "max_connections",
                "must be at least 1 (omit it for no limit)",
            ));
        }
        Ok(self)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            data_dir: cli.data_dir.unwrap_or(toml_config.storage.data_dir),
            max_connections: cli.max_connections.or(toml_config.server.max_connections),
            max_payload: cli.max_payload.or(toml_config.server.max_payload),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// `host:port` string handed to the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidValue(&'static str, &'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(field, reason) => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_address(), "0.0.0.0:5001");
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.max_connections, None);
        assert_eq!(config.max_payload, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 6000
            max_connections = 32

            [storage]
            data_dir = "/var/lib/photos"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.max_connections, Some(32));
        assert_eq!(config.server.max_payload, None);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/photos"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = toml::from_str("[server]\nport = 7000\n").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml_config: TomlConfig =
            toml::from_str("[server]\nhost = \"10.0.0.1\"\nport = 7000\nmax_payload = 1024\n")
                .unwrap();
        let cli = CliArgs {
            port: Some(8000),
            log_level: Some("trace".to_string()),
            ..CliArgs::default()
        };

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.bind_address(), "10.0.0.1:8000");
        assert_eq!(config.max_payload, Some(1024));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let toml_config: TomlConfig = toml::from_str("[server]\nmax_connections = 0\n").unwrap();
        let result = Config::merge(CliArgs::default(), toml_config).validate();
        match result {
            Err(e @ ConfigError::InvalidValue("max_connections", _)) => {
                assert!(e.to_string().starts_with("Invalid value for 'max_connections'"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let cli = CliArgs {
            max_connections: Some(1),
            ..CliArgs::default()
        };
        let config = Config::merge(cli, TomlConfig::default()).validate().unwrap();
        assert_eq!(config.max_connections, Some(1));
    }
}
