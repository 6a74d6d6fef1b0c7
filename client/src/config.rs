//! TOML configuration for a client session.
//!
//! ```toml
//! [client]
//! poll_timeout_ms = 5000
//!
//! [server]
//! command = "fsautocomplete"
//! args = ["--mode", "stdio"]
//! shutdown_timeout_ms = 2000
//! ```
//!
//! `${VAR}` references in `command` and `args` are expanded from the
//! environment when the server is spawned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::{ClientOptions, DEFAULT_POLL_TIMEOUT};

const DEFAULT_SERVER_COMMAND: &str = "fsautocomplete";

const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsacConfig {
    client: ClientConfig,
    server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Bounded wait of one reader iteration, in milliseconds.
    poll_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
        }
    }
}

/// How to launch the analysis server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    command: String,
    args: Vec<String>,
    /// Grace period between closing stdin and killing the process.
    shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_SERVER_COMMAND.to_string(),
            args: Vec::new(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Command with `${VAR}` references expanded.
    #[must_use]
    pub fn command(&self) -> String {
        expand_env_vars(&self.command)
    }

    /// Arguments with `${VAR}` references expanded.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        self.args.iter().map(|arg| expand_env_vars(arg)).collect()
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl FsacConfig {
    /// Load from an explicit path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {}: {err}", path.display());
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let config: Self = toml::from_str(&content).map_err(|err| {
            tracing::warn!("Failed to parse config at {}: {err}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source: err,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from [`default_path`](Self::default_path), or defaults when the
    /// file does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// `~/.fsac/config.toml`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".fsac").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid("client.poll_timeout_ms must be positive"));
        }
        if self.server.command.trim().is_empty() {
            return Err(ConfigError::Invalid("server.command must not be empty"));
        }
        Ok(())
    }

    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            poll_timeout: Duration::from_millis(self.client.poll_timeout_ms),
        }
    }

    #[must_use]
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }
}

/// Replace `${VAR}` with the variable's value (empty when unset).
///
/// An unterminated `${` is kept verbatim.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&std::env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
