//! Configuration module for cbrt-service.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over the built-in defaults.

use crate::codec::{DEFAULT_DELIMITER, DEFAULT_MAX_FRAME_LEN};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// What the process should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Serve requests until interrupted
    Server,
    /// Run client drivers against an already running server
    Client,
    /// Start a server and drive it with clients in the same process
    #[default]
    Demo,
}

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "cbrt-service")]
#[command(author = "cbrt-service authors")]
#[command(version = "0.1.0")]
#[command(about = "A delimiter-framed cube root service", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run mode
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Address to bind to, or to dial in client mode (e.g., 127.0.0.1:8085)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Frame delimiter: a single character, an escape such as \t, or a byte value
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Close connections that send no complete frame for this long
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

    /// Longest accepted frame payload in bytes
    #[arg(long)]
    pub max_frame_len: Option<usize>,

    /// Client connect timeout
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Requests pipelined by each client
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Number of concurrent clients
    #[arg(short = 'n', long)]
    pub clients: Option<usize>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Frame delimiter
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Idle read timeout in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Longest accepted frame payload
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Number of runtime worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            delimiter: default_delimiter(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_frame_len: default_max_frame_len(),
            backlog: default_backlog(),
            workers: None,
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Requests per client
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of clients
    #[serde(default = "default_clients")]
    pub clients: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            batch_size: default_batch_size(),
            clients: default_clients(),
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
    "127.0.0.1:8085".to_string()
}

fn default_delimiter() -> String {
    "\\t".to_string()
}

fn default_idle_timeout_ms() -> u64 {
    10_000 // 10 seconds
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_backlog() -> i32 {
    1024
}

fn default_connect_timeout_ms() -> u64 {
    2_000 // 2 seconds
}

fn default_batch_size() -> usize {
    5
}

fn default_clients() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub listen: String,
    pub delimiter: u8,
    pub idle_timeout: Duration,
    pub max_frame_len: usize,
    pub backlog: i32,
    pub connect_timeout: Duration,
    pub batch_size: usize,
    pub clients: usize,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Mode::default(),
            listen: default_listen(),
            delimiter: DEFAULT_DELIMITER,
            idle_timeout: Duration::from_millis(default_idle_timeout_ms()),
            max_frame_len: default_max_frame_len(),
            backlog: default_backlog(),
            connect_timeout: Duration::from_millis(default_connect_timeout_ms()),
            batch_size: default_batch_size(),
            clients: default_clients(),
            workers: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
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

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let delimiter = parse_delimiter(
            cli.delimiter
                .as_deref()
                .unwrap_or(&toml_config.server.delimiter),
        )?;

        let idle_timeout_ms = cli
            .idle_timeout_ms
            .unwrap_or(toml_config.server.idle_timeout_ms);
        if idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("idle_timeout_ms", "must be positive"));
        }

        let connect_timeout_ms = cli
            .connect_timeout_ms
            .unwrap_or(toml_config.client.connect_timeout_ms);
        if connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "connect_timeout_ms",
                "must be positive",
            ));
        }

        let max_frame_len = cli
            .max_frame_len
            .unwrap_or(toml_config.server.max_frame_len);
        if max_frame_len == 0 {
            return Err(ConfigError::InvalidValue("max_frame_len", "must be positive"));
        }

        if toml_config.server.backlog <= 0 {
            return Err(ConfigError::InvalidValue("backlog", "must be positive"));
        }

        Ok(Config {
            mode: cli.mode.unwrap_or(toml_config.mode),
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            delimiter,
            idle_timeout: Duration::from_millis(idle_timeout_ms),
            max_frame_len,
            backlog: toml_config.server.backlog,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            batch_size: cli.batch_size.unwrap_or(toml_config.client.batch_size),
            clients: cli.clients.unwrap_or(toml_config.client.clients),
            workers: cli.workers.or(toml_config.server.workers),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Parse a delimiter setting into its byte value.
///
/// Accepts a single ASCII character, one of the escapes `\t`, `\n`, `\r`,
/// `\0`, or a byte value written in decimal (`9`) or hex (`0x09`). Bytes that
/// can show up inside a formatted request or response are refused, since a
/// frame payload must never contain its own terminator.
pub fn parse_delimiter(value: &str) -> Result<u8, ConfigError> {
    let invalid = |reason| ConfigError::InvalidDelimiter(value.to_string(), reason);

    let byte = match value {
        "\\t" => b'\t',
        "\\n" => b'\n',
        "\\r" => b'\r',
        "\\0" => 0,
        _ if value.len() == 1 && !value.as_bytes()[0].is_ascii_digit() => value.as_bytes()[0],
        _ => {
            let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
                Some(hex) => u8::from_str_radix(hex, 16),
                None => value.parse::<u8>(),
            };
            parsed.map_err(|_| invalid("not a single character or byte value"))?
        }
    };

    if !byte.is_ascii() {
        return Err(invalid("must be an ASCII byte"));
    }
    if byte.is_ascii_alphanumeric() || matches!(byte, b' ' | b'.' | b'-' | b'"') {
        return Err(invalid("may appear inside request or response text"));
    }

    Ok(byte)
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidDelimiter(String, &'static str),
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
            ConfigError::InvalidDelimiter(value, reason) => {
                write!(f, "Invalid delimiter '{}': {}", value, reason)
            }
            ConfigError::InvalidValue(field, reason) => {
                write!(f, "Invalid value for {}: {}", field, reason)
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
        let config = TomlConfig::default();
        assert_eq!(config.mode, Mode::Demo);
        assert_eq!(config.server.listen, "127.0.0.1:8085");
        assert_eq!(config.server.idle_timeout_ms, 10_000);
        assert_eq!(config.client.connect_timeout_ms, 2_000);
        assert_eq!(config.client.batch_size, 5);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = Config::resolve(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.delimiter, b'\t');
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.clients, 1);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            mode = "server"

            [server]
            listen = "0.0.0.0:9000"
            delimiter = "0x1e"
            idle_timeout_ms = 2500
            max_frame_len = 64
            workers = 4

            [client]
            batch_size = 8
            clients = 3

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(toml_config.mode, Mode::Server);
        assert_eq!(toml_config.client.connect_timeout_ms, 2_000);

        let config = Config::resolve(CliArgs::default(), toml_config).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.delimiter, 0x1e);
        assert_eq!(config.idle_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_frame_len, 64);
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.clients, 3);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            [client]
            batch_size = 8
            "#,
        )
        .unwrap();

        let cli = CliArgs::parse_from([
            "cbrt-service",
            "--mode",
            "client",
            "-l",
            "127.0.0.1:7000",
            "-b",
            "2",
            "--delimiter",
            "|",
        ]);

        let config = Config::resolve(cli, toml_config).unwrap();
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.listen, "127.0.0.1:7000");
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.delimiter, b'|');
    }

    #[test]
    fn test_defaults_match_codec() {
        let config = Config::default();
        assert_eq!(config.delimiter, DEFAULT_DELIMITER);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);

        let toml_config = TomlConfig::default();
        assert_eq!(
            parse_delimiter(&toml_config.server.delimiter).unwrap(),
            DEFAULT_DELIMITER
        );
        assert_eq!(toml_config.server.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert_eq!(parse_delimiter("\\n").unwrap(), b'\n');
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("9").unwrap(), 9);
        assert_eq!(parse_delimiter("0x0A").unwrap(), b'\n');
    }

    #[test]
    fn test_parse_delimiter_rejects_payload_bytes() {
        for value in ["a", "-", ".", " ", "\"", "48", "0x80", "300", "ab", ""] {
            assert!(
                matches!(
                    parse_delimiter(value),
                    Err(ConfigError::InvalidDelimiter(..))
                ),
                "{value:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let cli = CliArgs {
            idle_timeout_ms: Some(0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::resolve(cli, TomlConfig::default()),
            Err(ConfigError::InvalidValue("idle_timeout_ms", _))
        ));

        let cli = CliArgs {
            connect_timeout_ms: Some(0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::resolve(cli, TomlConfig::default()),
            Err(ConfigError::InvalidValue("connect_timeout_ms", _))
        ));
    }
}
