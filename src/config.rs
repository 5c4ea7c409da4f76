//! Configuration Module
//!
//! This module provides constants and default configurations for netcmd, and
//! loads the optional TOML configuration file used by the daemon. The file's
//! `[commands]` table is the name to handler mapping the server registry is
//! populated from.

use crate::utils::error::{NetcmdError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Constants for default settings
pub const DEFAULT_CONFIG_PATH: &str = "/etc/netcmd/netcmdd.toml";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 7007;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Idle read timeout applied to every socket, client and server side
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings the admission controller needs to run one server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_concurrency: usize,
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Build a config listening on `bind_address:port` with the given ceiling
    pub fn new(bind_address: impl Into<String>, port: u16, max_concurrency: usize) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            max_concurrency,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    /// Address string handed to the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Reject settings the admission controller cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(NetcmdError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(NetcmdError::Config(
                "idle_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where and how verbosely to log
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; console only when absent
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// `[server]` section of the configuration file
#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_max_concurrency")]
    max_concurrency: usize,
    #[serde(default = "default_idle_timeout_secs")]
    idle_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_concurrency: default_max_concurrency(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Raw layout of the TOML file
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    logging: LoggingConfig,
    commands: Option<BTreeMap<String, String>>,
}

fn default_bind() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_idle_timeout_secs() -> u64 {
    IDLE_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Fully resolved daemon configuration
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    /// Command name to handler kind; `None` means use the stock mapping
    pub commands: Option<BTreeMap<String, String>>,
}

impl DaemonConfig {
    /// Parse a configuration document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: TomlConfig = toml::from_str(contents)?;
        let config = Self {
            server: ServerConfig {
                bind_address: raw.server.bind,
                port: raw.server.port,
                max_concurrency: raw.server.max_concurrency,
                idle_timeout: Duration::from_secs(raw.server.idle_timeout_secs),
            },
            logging: raw.logging,
            commands: raw.commands.map(|commands| {
                commands
                    .into_iter()
                    .map(|(name, kind)| (name.trim().to_lowercase(), kind))
                    .collect()
            }),
        };
        config.server.validate()?;
        Ok(config)
    }

    /// Load the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NetcmdError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load `path` when it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
