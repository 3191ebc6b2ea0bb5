//! JSON configuration model shared by the supervisor and the worker.
//!
//! The supervisor reads a fixed path (default `config.json`, overridable on
//! the CLI); the worker receives the same path through the `CONFIG`
//! environment variable when it is spawned.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_IRC_PORT: u16 = 6667;
const DEFAULT_NICKNAME: &str = "chirpd";

/// Environment variable carrying the config path into the worker process.
pub const CONFIG_ENV: &str = "CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The `core` section is mandatory — startup aborts without it.
    #[error("missing core section from config")]
    MissingCore,
    #[error("{CONFIG_ENV} environment variable is not set")]
    MissingEnv,
}

/// The `core` section: process-wide settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    pub log_file: PathBuf,
    /// SQLite database holding the role tables consulted by admin commands.
    pub db: PathBuf,
    #[serde(default = "default_nickname")]
    pub nickname: String,
    #[serde(default)]
    pub realname: Option<String>,
}

fn default_nickname() -> String {
    DEFAULT_NICKNAME.to_string()
}

/// One IRC network to connect to. Immutable for the process lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, rename = "ssl")]
    pub tls: bool,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_port() -> u16 {
    DEFAULT_IRC_PORT
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// One entry of the `plugins` array. `module` selects from the closed set of
/// shipped plugins; unknown modules are skipped at load time with an error log.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub module: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    core: Option<CoreConfig>,
    #[serde(default)]
    networks: Vec<NetworkConfig>,
    #[serde(default)]
    plugins: Vec<PluginDescriptor>,
}

/// Fully validated configuration document.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub core: CoreConfig,
    pub networks: Vec<NetworkConfig>,
    pub plugins: Vec<PluginDescriptor>,
    /// Path the document was loaded from — forwarded to the worker via `CONFIG`.
    pub path: PathBuf,
}

impl BotConfig {
    /// Load and validate a config document from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let core = raw.core.ok_or(ConfigError::MissingCore)?;
        Ok(Self {
            core,
            networks: raw.networks,
            plugins: raw.plugins,
            path: path.to_path_buf(),
        })
    }

    /// Load the config from the path in the `CONFIG` environment variable
    /// (worker entry point).
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).map_err(|_| ConfigError::MissingEnv)?;
        Self::load(Path::new(&path))
    }
}
