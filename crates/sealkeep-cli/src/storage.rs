use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use dirs::data_local_dir;
use sealkeep_core::{
    settings::{ConfigurationStore, FileDocumentStore},
    strategy::select_strategy,
    StrategyChoice,
};
use sealkeep_storage::{
    key_provider::KeyringProvider,
    repository::KeyStoreRepository,
    sealing::{
        hardware::{CredentialAuthority, NoCredentialAuthority},
        HardwareSealer, IdentitySealer, SealingEngine, SealingStrategy,
    },
};
use tracing::debug;

use crate::config::Config;

/// Keyring account holding the identity sealing key.
pub const IDENTITY_KEY_ACCOUNT: &str = "identity-seal-key";

pub const SETTINGS_FILE: &str = "settings.toml";

/// Resolve the default data directory for SealKeep.
pub fn default_data_dir() -> Result<PathBuf> {
    let base =
        data_local_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("sealkeep"))
}

pub fn data_dir(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(root) => Ok(root.clone()),
        None => default_data_dir(),
    }
}

/// Open the persisted settings under the data directory.
pub fn settings_from_config(config: &Config) -> Result<ConfigurationStore> {
    let path = data_dir(config)?.join(SETTINGS_FILE);
    debug!(?path, "loading settings");
    Ok(ConfigurationStore::load(FileDocumentStore::new(path)))
}

/// Strategy for this run: command line, then config file, then saved setting.
pub fn resolve_strategy(
    flag: Option<StrategyChoice>,
    config: &Config,
    settings: &ConfigurationStore,
) -> StrategyChoice {
    flag.or(config.default_strategy)
        .unwrap_or_else(|| settings.active_strategy())
}

/// Hardware credential service of this platform. No hardware-backed credential
/// service is wired on the supported targets yet.
pub fn platform_authority() -> Arc<dyn CredentialAuthority> {
    Arc::new(NoCredentialAuthority)
}

pub async fn hardware_supported() -> bool {
    platform_authority().is_supported().await
}

/// Build the sealing engine for `strategy` using config overrides.
pub async fn engine_from_config(config: &Config, strategy: StrategyChoice) -> Result<SealingEngine> {
    let root = data_dir(config)?;
    let authority = platform_authority();
    let strategy = select_strategy(strategy, authority.is_supported().await)?;
    debug!(?root, %strategy, "initializing sealing engine");

    let sealing = match strategy {
        StrategyChoice::IdentityBound => {
            SealingStrategy::IdentityBound(IdentitySealer::new(Arc::new(KeyringProvider::new(
                config.keyring_service(),
                IDENTITY_KEY_ACCOUNT,
            ))))
        }
        StrategyChoice::HardwareCredential => SealingStrategy::HardwareCredential(
            HardwareSealer::probe(authority, config.credential_name()).await?,
        ),
    };
    Ok(SealingEngine::new(sealing, KeyStoreRepository::new(root)))
}

/// Helper for tests to build an engine rooted at a temp dir with an in-memory key.
#[cfg(test)]
pub fn test_engine(root: impl Into<PathBuf>) -> SealingEngine {
    use sealkeep_storage::key_provider::InMemoryKeyProvider;

    SealingEngine::new(
        SealingStrategy::IdentityBound(IdentitySealer::new(Arc::new(
            InMemoryKeyProvider::default(),
        ))),
        KeyStoreRepository::new(root),
    )
}
