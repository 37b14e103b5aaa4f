//! Configuration system for the `MentorLink` development server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/mentorlink-server/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    users: Vec<UserSeed>,
}

/// `[server]` section of the server config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    ping_interval_ms: Option<u64>,
    ping_timeout_ms: Option<u64>,
    max_history: Option<usize>,
}

/// One `[[users]]` entry: a seeded account.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UserSeed {
    /// User id.
    pub id: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: String,
    /// Avatar URL.
    #[serde(default)]
    pub photo_url: String,
    /// Identity cookie value; the id is used when absent.
    #[serde(default)]
    pub token: Option<String>,
}

impl UserSeed {
    /// A seed whose token is its id.
    #[must_use]
    pub fn new(id: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            photo_url: String::new(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the development server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "MentorLink development server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "MENTORLINK_SERVER_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/mentorlink-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interval between heartbeat pings, in milliseconds.
    #[arg(long)]
    pub ping_interval_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MENTORLINK_SERVER_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:7777`).
    pub bind_addr: String,
    /// Interval between heartbeat pings.
    pub ping_interval: Duration,
    /// Grace period after a missed ping before a socket is dropped.
    pub ping_timeout: Duration,
    /// Messages kept per room.
    pub max_history: usize,
    /// Seeded accounts.
    pub users: Vec<UserSeed>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7777".to_string(),
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
            max_history: 1000,
            users: default_users(),
            log_level: "info".to_string(),
        }
    }
}

/// Accounts available when the config file seeds none.
fn default_users() -> Vec<UserSeed> {
    vec![
        UserSeed::new("mentor", "Maya", "Chen"),
        UserSeed::new("mentee", "Sam", "Patel"),
    ]
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: ServerConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            ping_interval: cli
                .ping_interval_ms
                .or(file.server.ping_interval_ms)
                .map_or(defaults.ping_interval, Duration::from_millis),
            ping_timeout: file
                .server
                .ping_timeout_ms
                .map_or(defaults.ping_timeout, Duration::from_millis),
            max_history: file.server.max_history.unwrap_or(defaults.max_history),
            users: if file.users.is_empty() {
                defaults.users
            } else {
                file.users
            },
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ServerConfigFile::default());
    };
    let path = config_dir.join("mentorlink-server").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
