use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use sealkeep_core::StrategyChoice;

/// Keyring service holding the identity sealing key.
pub const DEFAULT_KEYRING_SERVICE: &str = "sealkeep";

/// User-level configuration loaded from `~/.config/sealkeep/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the data directory (records and settings).
    pub data_dir: Option<PathBuf>,
    /// Keyring service name for the identity sealing key.
    pub keyring_service: Option<String>,
    /// Name of the hardware credential.
    pub credential_name: Option<String>,
    /// Strategy to use regardless of the saved setting.
    pub default_strategy: Option<StrategyChoice>,
}

impl Config {
    pub fn keyring_service(&self) -> &str {
        self.keyring_service
            .as_deref()
            .unwrap_or(DEFAULT_KEYRING_SERVICE)
    }

    pub fn credential_name(&self) -> &str {
        self.credential_name
            .as_deref()
            .unwrap_or(sealkeep_storage::sealing::hardware::DEFAULT_CREDENTIAL_NAME)
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("sealkeep").join("config.toml"))
}

/// Write the config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
