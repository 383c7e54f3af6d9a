//! Collaborators supplied by the host application. The core treats these as opaque
//! functions; dialogs, menus and lifecycle hooks stay on the host side.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{KeyStoreError, LogicalIdentifier, SecretKey, StrategyChoice};

/// Name under which this store appears among a login's authentication factors.
pub const STORE_FACTOR_NAME: &str = "SealKeep";

/// What the host asks for when it needs key bytes from this store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRequest {
    /// A new master key is being created; fresh random bytes are expected.
    CreateNew,
    /// An existing login is being opened for the given resource.
    OpenExisting(LogicalIdentifier),
}

/// Key provider callback registered with the host.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fresh bytes for [`KeyRequest::CreateNew`]; the protected key (if any) otherwise.
    async fn key_for(&self, request: &KeyRequest) -> Result<Option<SecretKey>, KeyStoreError>;
}

/// Authentication factors that make up one login.
pub trait CompositeKey {
    /// Names of the factors in the login (passwords, key files, providers).
    fn factor_names(&self) -> Vec<String>;

    /// Raw bytes of the named factor, if the host can expose them.
    fn factor_data(&self, name: &str) -> Option<SecretKey>;
}

/// How this store participates in a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorMatch {
    Absent,
    /// One of several combined factors.
    Shared,
    /// The only factor of the login.
    Exclusive,
}

/// Look for this store among the factors of `key` (name comparison ignores case).
pub fn find_store_factor(key: &dyn CompositeKey) -> FactorMatch {
    let names = key.factor_names();
    let present = names
        .iter()
        .any(|name| name.eq_ignore_ascii_case(STORE_FACTOR_NAME));
    match (present, names.len()) {
        (false, _) => FactorMatch::Absent,
        (true, 1) => FactorMatch::Exclusive,
        (true, _) => FactorMatch::Shared,
    }
}

/// What a file prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePurpose {
    SaveRecoveryDocument,
    OpenRecoveryDocument,
    /// Locate the resource a recovery document belongs to (it may have moved).
    LocateResource,
}

/// How the key inside a recovery document is wrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryProtection {
    /// A random key stored inside the document.
    RandomKey,
    /// A key derived from a user password.
    Password(SecretKey),
}

/// Synchronous decision functions backed by the host's UI.
pub trait HostDecisions: Send + Sync {
    /// A different key is already protected for `id`; may it be replaced?
    fn confirm_overwrite(&self, id: &LogicalIdentifier) -> bool;

    /// Pick a strategy; `None` cancels.
    fn choose_strategy(&self, hardware_supported: bool) -> Option<StrategyChoice>;

    /// Choose how a new recovery document is protected; `None` cancels.
    fn enter_password(&self) -> Option<RecoveryProtection>;

    /// Ask for the password of a password-protected recovery document.
    fn verify_password(&self) -> Option<SecretKey>;

    /// Pick a file for `purpose`, starting from `initial_dir`.
    fn pick_file(&self, purpose: FilePurpose, initial_dir: Option<&Path>) -> Option<PathBuf>;
}
