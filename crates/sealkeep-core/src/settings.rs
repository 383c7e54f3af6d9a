use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{KeyStoreError, LogicalIdentifier, StrategyChoice};

/// Version written into new settings documents; other versions are discarded on load.
pub const SETTINGS_VERSION: &str = "1.0";

/// Reads and writes the raw settings document.
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when the document does not exist yet.
    fn read(&self) -> Result<Option<String>, KeyStoreError>;

    fn write(&self, contents: &str) -> Result<(), KeyStoreError>;
}

/// Settings document stored in a file. Writes go through a temporary file in the
/// same directory and are persisted atomically.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    path: PathBuf,
}

impl FileDocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentStore for FileDocumentStore {
    fn read(&self) -> Result<Option<String>, KeyStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(KeyStoreError::io("reading settings", err)),
        }
    }

    fn write(&self, contents: &str) -> Result<(), KeyStoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| KeyStoreError::io("writing settings", e))?;

        let mut tmp =
            NamedTempFile::new_in(dir).map_err(|e| KeyStoreError::io("writing settings", e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| KeyStoreError::io("writing settings", e))?;
        tmp.flush()
            .map_err(|e| KeyStoreError::io("writing settings", e))?;
        tmp.persist(&self.path)
            .map_err(|e| KeyStoreError::io("writing settings", e.error))?;
        Ok(())
    }
}

/// In-memory document store for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<Option<String>>>,
}

impl MemoryDocumentStore {
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(contents.into()))),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read(&self) -> Result<Option<String>, KeyStoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyStoreError::io("reading settings", err))?;
        Ok(guard.clone())
    }

    fn write(&self, contents: &str) -> Result<(), KeyStoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyStoreError::io("writing settings", err))?;
        *guard = Some(contents.to_string());
        Ok(())
    }
}

/// One auto-login entry: a resource and whether automatic unlock is enabled for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoLoginEntry {
    pub identifier: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SettingsDocument {
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_directory: Option<PathBuf>,
    #[serde(default)]
    active_strategy: StrategyChoice,
    #[serde(default = "default_auto_login")]
    auto_login_by_default: bool,
    #[serde(default, rename = "AutoLogin")]
    auto_logins: Vec<AutoLoginEntry>,
}

fn default_auto_login() -> bool {
    true
}

impl Default for SettingsDocument {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION.to_string(),
            last_directory: None,
            active_strategy: StrategyChoice::default(),
            auto_login_by_default: default_auto_login(),
            auto_logins: Vec::new(),
        }
    }
}

/// Persisted application settings. Constructed once by the entry point and passed
/// explicitly to the operations that need it; every setter saves immediately.
pub struct ConfigurationStore {
    documents: Box<dyn DocumentStore>,
    state: SettingsDocument,
}

impl ConfigurationStore {
    /// Load settings. Missing, unreadable or wrong-version documents yield defaults.
    pub fn load(documents: impl DocumentStore + 'static) -> Self {
        let state = match documents.read() {
            Ok(Some(contents)) if !contents.trim().is_empty() => parse_document(&contents),
            Ok(_) => SettingsDocument::default(),
            Err(err) => {
                warn!(error = %err, "settings unavailable, using defaults");
                SettingsDocument::default()
            }
        };

        Self {
            documents: Box::new(documents),
            state,
        }
    }

    pub fn version(&self) -> &str {
        &self.state.version
    }

    pub fn last_directory(&self) -> Option<&Path> {
        self.state.last_directory.as_deref()
    }

    pub fn set_last_directory(&mut self, dir: impl Into<PathBuf>) -> Result<(), KeyStoreError> {
        let dir = dir.into();
        self.update(|state| state.last_directory = Some(dir))
    }

    pub fn active_strategy(&self) -> StrategyChoice {
        self.state.active_strategy
    }

    pub fn set_active_strategy(&mut self, strategy: StrategyChoice) -> Result<(), KeyStoreError> {
        self.update(|state| state.active_strategy = strategy)
    }

    pub fn auto_login_by_default(&self) -> bool {
        self.state.auto_login_by_default
    }

    pub fn set_auto_login_by_default(&mut self, enabled: bool) -> Result<(), KeyStoreError> {
        self.update(|state| state.auto_login_by_default = enabled)
    }

    pub fn auto_logins(&self) -> &[AutoLoginEntry] {
        &self.state.auto_logins
    }

    /// `Some(enabled)` when `id` has an auto-login entry (case-insensitive match).
    pub fn auto_login(&self, id: &LogicalIdentifier) -> Option<bool> {
        self.position(id).map(|idx| self.state.auto_logins[idx].enabled)
    }

    /// Add an entry using `AutoLoginByDefault`. Returns false if one already exists.
    pub fn add_auto_login(&mut self, id: &LogicalIdentifier) -> Result<bool, KeyStoreError> {
        if id.is_empty() || self.position(id).is_some() {
            return Ok(false);
        }
        let entry = AutoLoginEntry {
            identifier: id.as_str().to_string(),
            enabled: self.state.auto_login_by_default,
        };
        self.update(|state| state.auto_logins.push(entry))?;
        Ok(true)
    }

    /// Remove the entry for `id`. Returns false if there was none.
    pub fn remove_auto_login(&mut self, id: &LogicalIdentifier) -> Result<bool, KeyStoreError> {
        let Some(idx) = self.position(id) else {
            return Ok(false);
        };
        self.update(|state| {
            state.auto_logins.remove(idx);
        })?;
        Ok(true)
    }

    /// Toggle an existing entry. Returns false if there was none.
    pub fn set_auto_login_enabled(
        &mut self,
        id: &LogicalIdentifier,
        enabled: bool,
    ) -> Result<bool, KeyStoreError> {
        let Some(idx) = self.position(id) else {
            return Ok(false);
        };
        self.update(|state| state.auto_logins[idx].enabled = enabled)?;
        Ok(true)
    }

    fn position(&self, id: &LogicalIdentifier) -> Option<usize> {
        self.state
            .auto_logins
            .iter()
            .position(|entry| LogicalIdentifier::new(entry.identifier.as_str()) == *id)
    }

    /// Apply `change` to a copy and keep it only once it has been saved.
    fn update(&mut self, change: impl FnOnce(&mut SettingsDocument)) -> Result<(), KeyStoreError> {
        let mut next = self.state.clone();
        change(&mut next);
        let body = toml::to_string_pretty(&next)
            .map_err(|e| KeyStoreError::io("encoding settings", e))?;
        self.documents.write(&body)?;
        self.state = next;
        Ok(())
    }
}

fn parse_document(contents: &str) -> SettingsDocument {
    match toml::from_str::<SettingsDocument>(contents) {
        Ok(doc) if doc.version == SETTINGS_VERSION => doc,
        Ok(doc) => {
            debug!(version = %doc.version, "unsupported settings version, using defaults");
            SettingsDocument::default()
        }
        Err(err) => {
            debug!(error = %err, "settings document unreadable, using defaults");
            SettingsDocument::default()
        }
    }
}
