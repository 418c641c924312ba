//! Layered configuration: built-in defaults, then an optional TOML file, then
//! `LEASEHOLD__SECTION__KEY` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::transfer::ArchiveLimits;

pub const APP_NAME: &str = "leasehold";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub lease: LeaseSettings,
    pub transfer: TransferSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the lease table file.
    pub state_file: String,
    /// Directory holding one subdirectory per session.
    pub sessions_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            state_file: "./sessions/state.json".to_string(),
            sessions_dir: "./sessions".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn state_file_path(&self) -> Result<PathBuf> {
        expand_str_path(&self.state_file)
    }

    pub fn sessions_dir_path(&self) -> Result<PathBuf> {
        expand_str_path(&self.sessions_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSettings {
    /// Seconds a lease may be held before it can be reclaimed.
    pub ttl_secs: u64,
    /// Seconds between background sweeps. 0 leaves reclamation to acquire.
    pub sweep_interval_secs: u64,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            sweep_interval_secs: 0,
        }
    }
}

impl LeaseSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Maximum archive size in bytes, for uploads and for packaged content.
    pub max_archive_bytes: u64,
    /// Maximum number of entries in an archive.
    pub max_archive_entries: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_archive_bytes: 100 * 1024 * 1024,
            max_archive_entries: 100_000,
        }
    }
}

impl TransferSettings {
    pub fn limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_bytes: self.max_archive_bytes,
            max_entries: self.max_archive_entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Load settings from `path` (if it exists) and the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let defaults = Settings::default();
        let built = Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", i64::from(defaults.server.port))?
            .set_default("storage.state_file", defaults.storage.state_file)?
            .set_default("storage.sessions_dir", defaults.storage.sessions_dir)?
            .set_default("lease.ttl_secs", defaults.lease.ttl_secs)?
            .set_default("lease.sweep_interval_secs", defaults.lease.sweep_interval_secs)?
            .set_default("transfer.max_archive_bytes", defaults.transfer.max_archive_bytes)?
            .set_default("transfer.max_archive_entries", defaults.transfer.max_archive_entries)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.json", defaults.logging.json)?
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(&env_prefix())
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("loading configuration from {}", path.display()))?;

        built
            .try_deserialize()
            .context("deserializing configuration")
    }

    /// Write the default configuration to `path`, creating parent directories.
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }

        let toml = toml::to_string_pretty(&Settings::default())
            .context("serializing default config to TOML")?;
        let mut body = format!("# Configuration for {APP_NAME}\n# File: {}\n\n", path.display());
        body.push_str(&toml);
        fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
    }
}

/// Config file to use: an explicit override (a directory means
/// `<dir>/config.toml`) or the per-user default.
pub fn resolve_config_path(override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => expand_str_path(text),
        None => Ok(path.to_path_buf()),
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
