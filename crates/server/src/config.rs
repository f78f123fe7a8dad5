//! Configuration management for the WebTerm server.
//!
//! TOML-based configuration with environment variable overrides. The default
//! configuration path is `~/.config/webterm/config.toml`; a missing file
//! means defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::pty::SpawnSpec;
use crate::session::TimeoutPolicy;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("idle_timeout_ms must be greater than 0, got {0}")]
    InvalidIdleTimeout(u64),

    #[error("warning_lead_ms must be greater than 0 and less than idle_timeout_ms, got {lead} (idle_timeout_ms = {timeout})")]
    InvalidWarningLead { lead: u64, timeout: u64 },

    #[error("token_ttl_secs must be greater than 0")]
    InvalidTokenTtl,

    #[error("jwt_secret must not be empty")]
    EmptySecret,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the WebTerm server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP/WebSocket listener configuration.
    pub server: ServerConfig,

    /// Session lifecycle configuration.
    pub session: SessionConfig,

    /// Authentication configuration.
    pub auth: AuthConfig,

    /// Command filter configuration.
    pub filter: FilterConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_addr: String,

    /// Port to listen on.
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of concurrent sessions across all users.
    pub max_sessions: usize,

    /// Total idle budget in milliseconds before a session is closed.
    pub idle_timeout_ms: u64,

    /// How long before the close the one-time warning fires, milliseconds.
    pub warning_lead_ms: u64,

    /// Shell to spawn. `None` means `$SHELL`, falling back to /bin/sh.
    pub shell: Option<String>,

    /// Working directory for new shells. `None` means `$HOME`.
    pub working_dir: Option<PathBuf>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret used to sign bearer tokens.
    pub jwt_secret: String,

    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,

    /// Username of the seeded admin account.
    pub admin_user: String,

    /// Password of the seeded admin account.
    pub admin_password: String,
}

/// Command filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    /// Whether inbound command text is checked against the blacklist.
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            idle_timeout_ms: 300_000,
            warning_lead_ms: 30_000,
            shell: None,
            working_dir: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "default-secret".to_string(),
            token_ttl_secs: 86_400,
            admin_user: "admin".to_string(),
            admin_password: "admin123".to_string(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webterm")
        .join("config.toml")
}

impl Config {
    /// Loads configuration from a specific file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads from the default path, or returns defaults if no file exists.
    pub fn load_or_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values:
    /// - `PORT`: listener port
    /// - `MAX_SESSIONS`: global session capacity
    /// - `SESSION_TIMEOUT`: idle timeout in milliseconds
    /// - `JWT_SECRET`: token signing secret
    /// - `LOG_LEVEL`: log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("PORT") {
            match value.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(%value, "Ignoring invalid PORT override"),
            }
        }

        if let Ok(value) = std::env::var("MAX_SESSIONS") {
            match value.parse() {
                Ok(max) => self.session.max_sessions = max,
                Err(_) => tracing::warn!(%value, "Ignoring invalid MAX_SESSIONS override"),
            }
        }

        if let Ok(value) = std::env::var("SESSION_TIMEOUT") {
            match value.parse() {
                Ok(timeout) => self.session.idle_timeout_ms = timeout,
                Err(_) => tracing::warn!(%value, "Ignoring invalid SESSION_TIMEOUT override"),
            }
        }

        if let Ok(value) = std::env::var("JWT_SECRET") {
            if !value.is_empty() {
                self.auth.jwt_secret = value;
            }
        }

        if let Ok(value) = std::env::var("LOG_LEVEL") {
            if !value.is_empty() {
                self.server.log_level = value;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_sessions < 1 || self.session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidIdleTimeout(self.session.idle_timeout_ms));
        }

        // The warning must fire strictly inside the idle window.
        if self.session.warning_lead_ms == 0
            || self.session.warning_lead_ms >= self.session.idle_timeout_ms
        {
            return Err(ConfigError::InvalidWarningLead {
                lead: self.session.warning_lead_ms,
                timeout: self.session.idle_timeout_ms,
            });
        }

        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::InvalidTokenTtl);
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// The idle-timeout parameters for the session registry.
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            idle_timeout: Duration::from_millis(self.session.idle_timeout_ms),
            warning_lead: Duration::from_millis(self.session.warning_lead_ms),
        }
    }

    /// The spawn parameters for new shell sessions.
    pub fn spawn_spec(&self) -> SpawnSpec {
        SpawnSpec {
            shell: self.session.shell.clone(),
            cwd: self
                .session
                .working_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            ..SpawnSpec::default()
        }
    }

    /// The socket address string to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_addr, self.server.port)
    }
}
