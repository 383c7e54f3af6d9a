use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{KeyStoreError, LogicalIdentifier, SecretKey, StrategyChoice};

/// Whether an existing record holding a different key may be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    /// Report [`PutOutcome::NeedsConfirmation`] instead of replacing a different key.
    Ask,
    /// Replace unconditionally.
    Force,
}

/// Result of persisting a sealed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was created or replaced.
    Written,
    /// A record with the same plaintext already exists; nothing was written.
    Unchanged,
    /// A record with a different plaintext exists and `Overwrite::Ask` was given.
    NeedsConfirmation,
}

/// What the caller found when it unsealed the record about to be replaced.
///
/// The repository never decrypts, so the sealing side classifies the old record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorRecord {
    Absent,
    Same,
    Different,
    /// The old record could not be unsealed (other identity, corruption); it is replaced.
    Unreadable,
}

impl PriorRecord {
    /// Classify an unseal attempt of the existing record against the new plaintext.
    pub fn classify(
        existing: Result<Option<SecretKey>, KeyStoreError>,
        plaintext: &SecretKey,
    ) -> Self {
        match existing {
            Ok(None) => PriorRecord::Absent,
            Ok(Some(old)) if old == *plaintext => PriorRecord::Same,
            Ok(Some(_)) => PriorRecord::Different,
            Err(_) => PriorRecord::Unreadable,
        }
    }

    /// Overwrite policy: same key is a no-op, a different key needs confirmation.
    pub fn decide(self, overwrite: Overwrite) -> PutOutcome {
        match (self, overwrite) {
            (PriorRecord::Same, _) => PutOutcome::Unchanged,
            (PriorRecord::Different, Overwrite::Ask) => PutOutcome::NeedsConfirmation,
            _ => PutOutcome::Written,
        }
    }
}

/// Contract for sealing keys and persisting them per strategy.
#[async_trait]
pub trait ProtectedStore: Send + Sync {
    /// Strategy used by `encrypt` and `decrypt`.
    fn strategy(&self) -> StrategyChoice;

    /// Seal `plaintext` and persist it under `id`, honouring the overwrite policy.
    async fn encrypt(
        &self,
        id: &LogicalIdentifier,
        plaintext: &SecretKey,
        overwrite: Overwrite,
    ) -> Result<PutOutcome, KeyStoreError>;

    /// Unseal the record for `id`. `Ok(None)` when no record exists.
    async fn decrypt(&self, id: &LogicalIdentifier) -> Result<Option<SecretKey>, KeyStoreError>;

    /// Record filenames stored for `strategy`.
    async fn list_records(&self, strategy: StrategyChoice)
        -> Result<BTreeSet<String>, KeyStoreError>;

    /// Remove records (idempotent). Names may be identifiers or literal record filenames.
    async fn delete_records(
        &self,
        strategy: StrategyChoice,
        names: &[LogicalIdentifier],
    ) -> Result<(), KeyStoreError>;
}

/// In-memory protected store that simulates sealing for tests and smoke runs.
/// This is not cryptographically secure.
#[derive(Debug, Clone)]
pub struct InMemoryProtectedStore {
    strategy: StrategyChoice,
    inner: Arc<Mutex<HashMap<(StrategyChoice, String), Vec<u8>>>>,
}

impl Default for InMemoryProtectedStore {
    fn default() -> Self {
        Self::new(StrategyChoice::IdentityBound)
    }
}

impl InMemoryProtectedStore {
    pub fn new(strategy: StrategyChoice) -> Self {
        Self {
            strategy,
            inner: Arc::default(),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(StrategyChoice, String), Vec<u8>>>, KeyStoreError>
    {
        self.inner
            .lock()
            .map_err(|err| KeyStoreError::io("locking in-memory store", err))
    }
}

#[async_trait]
impl ProtectedStore for InMemoryProtectedStore {
    fn strategy(&self) -> StrategyChoice {
        self.strategy
    }

    async fn encrypt(
        &self,
        id: &LogicalIdentifier,
        plaintext: &SecretKey,
        overwrite: Overwrite,
    ) -> Result<PutOutcome, KeyStoreError> {
        let mut map = self.lock()?;
        let key = (self.strategy, id.record_file_name());
        let prior = match map.get(&key) {
            None => PriorRecord::Absent,
            Some(masked) => PriorRecord::classify(Ok(Some(unmask(masked))), plaintext),
        };

        let outcome = prior.decide(overwrite);
        if outcome == PutOutcome::Written {
            map.insert(key, mask(plaintext.as_bytes()));
        }
        Ok(outcome)
    }

    async fn decrypt(&self, id: &LogicalIdentifier) -> Result<Option<SecretKey>, KeyStoreError> {
        let map = self.lock()?;
        Ok(map
            .get(&(self.strategy, id.record_file_name()))
            .map(|masked| unmask(masked)))
    }

    async fn list_records(
        &self,
        strategy: StrategyChoice,
    ) -> Result<BTreeSet<String>, KeyStoreError> {
        let map = self.lock()?;
        Ok(map
            .keys()
            .filter(|(s, _)| *s == strategy)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn delete_records(
        &self,
        strategy: StrategyChoice,
        names: &[LogicalIdentifier],
    ) -> Result<(), KeyStoreError> {
        let mut map = self.lock()?;
        for name in names {
            map.remove(&(strategy, name.record_file_name()));
        }
        Ok(())
    }
}

const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}

fn unmask(input: &[u8]) -> SecretKey {
    SecretKey::new(mask(input)) // XOR twice restores original.
}
