//! Configuration system for the `MentorLink` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/mentorlink/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::chat::{LocalParticipant, Participant, ParticipantId};
use crate::transport::manager::ReconnectConfig;

/// API base used when none is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:7777/";

/// Real-time server used when none is configured or derivable.
pub const DEFAULT_SOCKET_URL: &str = "http://localhost:7777";

/// Errors that can occur when loading configuration.
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

    /// A configured URL is not valid.
    #[error("invalid {field} {value:?}: {source}")]
    InvalidUrl {
        /// Which setting held the URL.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Parser error.
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    user: UserFileConfig,
    reconnect: ReconnectFileConfig,
    ui: UiFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    socket_url: Option<String>,
    token: Option<String>,
}

/// `[user]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UserFileConfig {
    id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    photo_url: Option<String>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    enabled: Option<bool>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
    randomization_factor: Option<f64>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    poll_timeout_ms: Option<u64>,
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the HTTP API.
    pub api_url: Url,
    /// Base URL of the real-time server.
    pub socket_url: Url,
    /// Identity cookie value sent with every request.
    pub token: Option<String>,

    // -- User --
    /// Logged-in user id; the chat view stays unmounted without it.
    pub user_id: Option<String>,
    /// Logged-in user's display identity.
    pub profile: Participant,
    /// Counterpart to open on start.
    pub target: Option<String>,

    // -- Reconnect --
    /// Reconnection policy for the real-time channel.
    pub reconnect: ReconnectConfig,

    // -- UI --
    /// Poll timeout for the TUI event loop.
    pub poll_timeout: Duration,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_url(DEFAULT_API_URL),
            socket_url: default_url(DEFAULT_SOCKET_URL),
            token: None,
            user_id: None,
            profile: Participant::placeholder(),
            target: None,
            reconnect: ReconnectConfig::default(),
            poll_timeout: Duration::from_millis(50),
            timestamp_format: "%-I:%M %p".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/mentorlink/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if a configured URL is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. The socket URL, when not given, is
    /// derived from the API URL.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = match cli.api_url.as_ref().or(file.server.api_url.as_ref()) {
            Some(raw) => parse_url("api_url", raw)?,
            None => defaults.api_url,
        };
        let socket_url = match cli.socket_url.as_ref().or(file.server.socket_url.as_ref()) {
            Some(raw) => parse_url("socket_url", raw)?,
            None => derive_socket_url(&api_url),
        };

        let file_reconnect = &file.reconnect;
        let reconnect = ReconnectConfig {
            enabled: file_reconnect
                .enabled
                .unwrap_or(defaults.reconnect.enabled),
            initial_delay: file_reconnect
                .initial_delay_ms
                .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
            max_delay: file_reconnect
                .max_delay_ms
                .map_or(defaults.reconnect.max_delay, Duration::from_millis),
            max_attempts: cli
                .max_reconnect_attempts
                .or(file_reconnect.max_attempts)
                .unwrap_or(defaults.reconnect.max_attempts),
            randomization_factor: file_reconnect
                .randomization_factor
                .unwrap_or(defaults.reconnect.randomization_factor),
        };

        Ok(Self {
            api_url,
            socket_url,
            token: cli.token.clone().or_else(|| file.server.token.clone()),
            user_id: cli.user_id.clone().or_else(|| file.user.id.clone()),
            profile: Participant::from_parts(
                cli.first_name
                    .clone()
                    .or_else(|| file.user.first_name.clone()),
                file.user.last_name.clone(),
                file.user.photo_url.clone(),
            ),
            target: cli.target.clone(),
            reconnect,
            poll_timeout: file
                .ui
                .poll_timeout_ms
                .map_or(defaults.poll_timeout, Duration::from_millis),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        })
    }

    /// The logged-in participant, if a user id is configured.
    #[must_use]
    pub fn local_participant(&self) -> Option<LocalParticipant> {
        let id = self.user_id.as_deref().filter(|id| !id.is_empty())?;
        Some(LocalParticipant {
            id: ParticipantId::new(id),
            profile: self.profile.clone(),
        })
    }

    /// The counterpart to open on start, if any.
    #[must_use]
    pub fn initial_target(&self) -> Option<ParticipantId> {
        self.target
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(ParticipantId::new)
    }
}

/// Derive the real-time server from the API URL by dropping its `/api/`
/// path component, falling back to [`DEFAULT_SOCKET_URL`].
#[must_use]
pub fn derive_socket_url(api_url: &Url) -> Url {
    let derived = api_url.as_str().replace("/api/", "");
    Url::parse(&derived).unwrap_or_else(|e| {
        tracing::warn!(api_url = %api_url, err = %e, "cannot derive socket URL, using default");
        default_url(DEFAULT_SOCKET_URL)
    })
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: raw.to_string(),
        source,
    })
}

#[allow(clippy::expect_used)]
fn default_url(raw: &str) -> Url {
    Url::parse(raw).expect("built-in default URL is valid")
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal chat for MentorLink")]
pub struct CliArgs {
    /// Base URL of the HTTP API (e.g. `http://localhost:7777/api/`).
    #[arg(long, env = "MENTORLINK_API_URL")]
    pub api_url: Option<String>,

    /// Base URL of the real-time server (default: derived from the API URL).
    #[arg(long, env = "MENTORLINK_SOCKET_URL")]
    pub socket_url: Option<String>,

    /// Session token sent as the `token` cookie.
    #[arg(long, env = "MENTORLINK_TOKEN")]
    pub token: Option<String>,

    /// Your user id.
    #[arg(long, env = "MENTORLINK_USER_ID")]
    pub user_id: Option<String>,

    /// Your first name, shown to your chat partner.
    #[arg(long, env = "MENTORLINK_FIRST_NAME")]
    pub first_name: Option<String>,

    /// User id of the chat partner to open on start.
    #[arg(long, env = "MENTORLINK_TARGET")]
    pub target: Option<String>,

    /// Reconnection attempts before going offline.
    #[arg(long)]
    pub max_reconnect_attempts: Option<u32>,

    /// Path to config file (default: `~/.config/mentorlink/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MENTORLINK_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/mentorlink.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("mentorlink").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
