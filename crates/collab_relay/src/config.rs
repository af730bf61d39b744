use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::error::RelayError;

/// Room used when a client does not name a document
pub const DEFAULT_ROOM: &str = "default";

/// Port the y-websocket client connects to out of the box
pub const DEFAULT_PORT: u16 = 1234;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Relay service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listening address for WebSocket and HTTP traffic
    pub bind: SocketAddr,

    /// Room for connections that do not name one
    pub default_room: String,

    /// Per-connection outbound queue length before deliveries are dropped
    pub outbound_queue_capacity: usize,

    /// Largest accepted WebSocket message, in bytes
    pub max_frame_size: usize,

    /// Log level
    pub log_level: String,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            default_room: DEFAULT_ROOM.to_string(),
            outbound_queue_capacity: 256,
            max_frame_size: 16 * 1024 * 1024, // 16 MB
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// CLI arguments
#[derive(Parser, Debug, Default)]
#[command(name = "collab-relay")]
#[command(about = "Collab Relay: forwards document updates between clients in the same room")]
pub struct Cli {
    /// Configuration file path (TOML, or JSON with a .json extension)
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Full bind address, e.g. 0.0.0.0:1234
    #[arg(long, env = "RELAY_BIND")]
    pub bind: Option<SocketAddr>,

    /// Bind host, overrides the host part of the bind address
    #[arg(long, env = "RELAY_HOST")]
    pub host: Option<IpAddr>,

    /// Bind port, overrides the port part of the bind address
    #[arg(short, long, env = "RELAY_PORT")]
    pub port: Option<u16>,

    /// Room used when a client does not name one
    #[arg(long, env = "RELAY_DEFAULT_ROOM")]
    pub default_room: Option<String>,

    /// Per-connection outbound queue capacity
    #[arg(long, env = "RELAY_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Log level
    #[arg(long, env = "RELAY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Config {
    /// Load configuration from environment, CLI args, and optional config file
    pub fn from_env() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        // Override with CLI args
        if let Some(bind) = cli.bind {
            config.bind = bind;
        }
        if let Some(host) = cli.host {
            config.bind.set_ip(host);
        }
        if let Some(port) = cli.port {
            config.bind.set_port(port);
        }
        if let Some(default_room) = cli.default_room {
            config.default_room = default_room;
        }
        if let Some(capacity) = cli.queue_capacity {
            config.outbound_queue_capacity = capacity;
        }
        if let Some(log_level) = cli.log_level {
            config.log_level = log_level;
        }
        if let Some(log_format) = cli.log_format {
            config.log_format = log_format;
        }

        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            serde_json::from_str(&config_str).context("Failed to parse JSON config file")?
        } else {
            toml::from_str(&config_str).context("Failed to parse TOML config file")?
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.default_room.is_empty() {
            return Err(RelayError::Config("default_room must not be empty".to_string()));
        }

        if self.outbound_queue_capacity == 0 {
            return Err(RelayError::Config(
                "outbound_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.max_frame_size == 0 {
            return Err(RelayError::Config("max_frame_size must be greater than 0".to_string()));
        }

        if self.bind.ip().is_unspecified() {
            tracing::debug!(bind = %self.bind, "Relay listening on all interfaces without authentication");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind.port(), 1234);
        assert_eq!(config.default_room, "default");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.default_room = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_frame_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "collab-relay",
            "--host",
            "127.0.0.1",
            "--port",
            "9001",
            "--default-room",
            "lobby",
            "--log-format",
            "json",
        ])
        .unwrap();

        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.default_room, "lobby");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_port_overrides_bind() {
        let cli = Cli {
            bind: Some("10.0.0.1:80".parse().unwrap()),
            port: Some(4444),
            ..Default::default()
        };

        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.bind, "10.0.0.1:4444".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_toml_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
bind = "127.0.0.1:5555"
default_room = "example-document"
log_level = "debug"
"#
        )
        .unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = Config::from_cli(cli).unwrap();

        assert_eq!(config.bind.port(), 5555);
        assert_eq!(config.default_room, "example-document");
        assert_eq!(config.log_level, "debug");
        // Unset keys keep their defaults
        assert_eq!(config.outbound_queue_capacity, 256);
    }

    #[test]
    fn test_json_config_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"bind": "127.0.0.1:6666", "log_format": "json"}}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bind.port(), 6666);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "bind = 12").unwrap();

        assert!(Config::from_file(file.path()).is_err());
    }
}
