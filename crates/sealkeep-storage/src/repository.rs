use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use sealkeep_core::{
    identifier::RECORD_EXTENSION,
    store::{Overwrite, PriorRecord, PutOutcome},
    KeyStoreError, LogicalIdentifier, StrategyChoice,
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Content-addressed record files, one subdirectory per strategy.
///
/// The repository never decrypts: callers classify the existing record as a
/// [`PriorRecord`] before calling [`KeyStoreRepository::put`].
#[derive(Debug, Clone)]
pub struct KeyStoreRepository {
    root: PathBuf,
}

impl KeyStoreRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn strategy_dir(&self, strategy: StrategyChoice) -> PathBuf {
        self.root.join(strategy.subfolder())
    }

    pub fn path_for(&self, strategy: StrategyChoice, id: &LogicalIdentifier) -> PathBuf {
        self.strategy_dir(strategy).join(id.record_file_name())
    }

    /// Persist `ciphertext` for `id` according to the overwrite policy.
    #[instrument(skip_all, fields(strategy = %strategy, ?prior))]
    pub fn put(
        &self,
        strategy: StrategyChoice,
        id: &LogicalIdentifier,
        ciphertext: &[u8],
        prior: PriorRecord,
        overwrite: Overwrite,
    ) -> Result<PutOutcome, KeyStoreError> {
        let outcome = prior.decide(overwrite);
        if outcome != PutOutcome::Written {
            debug!(?outcome, "record left untouched");
            return Ok(outcome);
        }

        let dir = self.strategy_dir(strategy);
        fs::create_dir_all(&dir).map_err(|e| KeyStoreError::io("creating key store folder", e))?;
        write_atomic(&dir, &dir.join(id.record_file_name()), ciphertext)?;
        debug!("record written");
        Ok(PutOutcome::Written)
    }

    /// Raw ciphertext for `id`, `None` when no record exists.
    #[instrument(skip_all, fields(strategy = %strategy))]
    pub fn get(
        &self,
        strategy: StrategyChoice,
        id: &LogicalIdentifier,
    ) -> Result<Option<Vec<u8>>, KeyStoreError> {
        match fs::read(self.path_for(strategy, id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(KeyStoreError::io("reading protected key", err)),
        }
    }

    /// Remove the record for `id`. A missing file counts as success.
    #[instrument(skip_all, fields(strategy = %strategy))]
    pub fn delete(
        &self,
        strategy: StrategyChoice,
        id: &LogicalIdentifier,
    ) -> Result<bool, KeyStoreError> {
        match fs::remove_file(self.path_for(strategy, id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(KeyStoreError::io("removing protected key", err)),
        }
    }

    /// Sorted record filenames for `strategy`. Other files in the folder are ignored.
    #[instrument(skip_all, fields(strategy = %strategy))]
    pub fn list(&self, strategy: StrategyChoice) -> Result<Vec<String>, KeyStoreError> {
        let entries = match fs::read_dir(self.strategy_dir(strategy)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(KeyStoreError::io("listing key store", err)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KeyStoreError::io("listing key store", e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_file && name.to_lowercase().ends_with(RECORD_EXTENSION) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), KeyStoreError> {
    let mut tmp =
        NamedTempFile::new_in(dir).map_err(|e| KeyStoreError::io("writing protected key", e))?;
    tmp.write_all(bytes)
        .map_err(|e| KeyStoreError::io("writing protected key", e))?;
    tmp.flush()
        .map_err(|e| KeyStoreError::io("writing protected key", e))?;
    tmp.persist(path)
        .map_err(|e| KeyStoreError::io("writing protected key", e.error))?;
    Ok(())
}
