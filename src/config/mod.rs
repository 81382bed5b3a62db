//! Configuration management.
//!
//! Supports configuration from, lowest to highest precedence:
//! - Built-in defaults
//! - TOML config file (`--config`, else `<config dir>/buildconf/config.toml`)
//! - Environment variables (`BUILDCONF_*`)
//! - CLI arguments (applied by the binary)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::transport::TransportKind;

/// Register experimental protocol versions
pub const ENV_EXPERIMENTAL: &str = "BUILDCONF_EXPERIMENTAL";
/// Serve on this local socket instead of stdio
pub const ENV_PIPE: &str = "BUILDCONF_PIPE";
/// Log level
pub const ENV_LOG: &str = "BUILDCONF_LOG";

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ServerError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("buildconf").join("config.toml"))
    }

    /// Defaults, then file, then environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        Ok(EnvOverrides::from_env()?.apply(file))
    }

    /// Reject combinations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.queue_depth == 0 {
            return Err(ServerError::Config("queue_depth must be at least 1".into()));
        }
        if self.server.transport == TransportKind::Pipe && self.server.pipe.is_none() {
            return Err(ServerError::Config(
                "pipe transport selected but no pipe path is set".into(),
            ));
        }
        Ok(())
    }
}

/// Settings taken from `BUILDCONF_*` variables.
///
/// A field is `Some` only when its variable is set, so an override can switch
/// a setting off as well as on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// From `BUILDCONF_EXPERIMENTAL`
    pub experimental: Option<bool>,
    /// From `BUILDCONF_PIPE`
    pub pipe: Option<PathBuf>,
    /// From `BUILDCONF_LOG`
    pub level: Option<String>,
}

impl EnvOverrides {
    /// Read the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let experimental = match lookup(ENV_EXPERIMENTAL) {
            Some(val) => Some(parse_flag(ENV_EXPERIMENTAL, &val)?),
            None => None,
        };
        Ok(Self {
            experimental,
            pipe: lookup(ENV_PIPE).filter(|p| !p.is_empty()).map(PathBuf::from),
            level: lookup(ENV_LOG).filter(|l| !l.is_empty()),
        })
    }

    /// Layer the set variables over `config`
    pub fn apply(self, mut config: Config) -> Config {
        if let Some(experimental) = self.experimental {
            config.server.experimental = experimental;
        }
        if let Some(pipe) = self.pipe {
            config.server.transport = TransportKind::Pipe;
            config.server.pipe = Some(pipe);
        }
        if let Some(level) = self.level {
            config.logging.level = level;
        }
        config
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ServerError::Config(format!(
            "{name} must be a boolean, got \"{other}\""
        ))),
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Register experimental protocol versions
    pub experimental: bool,

    /// Channel the protocol is served on
    pub transport: TransportKind,

    /// Socket path for the pipe transport
    pub pipe: Option<PathBuf>,

    /// Requests buffered ahead of the worker
    pub queue_depth: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            experimental: false,
            transport: TransportKind::Stdio,
            pipe: None,
            queue_depth: 64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
