//! Sealing engine: binds key bytes to the current identity or to a hardware
//! credential and persists them through the [`KeyStoreRepository`].

pub mod foreground;
pub mod hardware;
pub mod identity;

use std::collections::BTreeSet;

use async_trait::async_trait;
use sealkeep_core::{
    store::{Overwrite, PriorRecord, ProtectedStore, PutOutcome},
    KeyStoreError, LogicalIdentifier, SecretKey, StrategyChoice,
};
use tracing::{debug, instrument, warn};

pub use hardware::HardwareSealer;
pub use identity::IdentitySealer;

use crate::repository::KeyStoreRepository;

/// Application entropy bound into every sealed record.
pub const SEALING_ENTROPY: [u8; 16] = [
    0xF7, 0x72, 0x93, 0x27, 0x62, 0xAF, 0x4F, 0x2B, 0x87, 0x32, 0xE8, 0x0B, 0x92, 0x33, 0x0A, 0x06,
];

/// The two sealing strategies.
pub enum SealingStrategy {
    IdentityBound(IdentitySealer),
    HardwareCredential(HardwareSealer),
}

impl SealingStrategy {
    pub fn choice(&self) -> StrategyChoice {
        match self {
            SealingStrategy::IdentityBound(_) => StrategyChoice::IdentityBound,
            SealingStrategy::HardwareCredential(_) => StrategyChoice::HardwareCredential,
        }
    }

    pub async fn seal(&self, plaintext: &SecretKey) -> Result<Vec<u8>, KeyStoreError> {
        match self {
            SealingStrategy::IdentityBound(sealer) => sealer.seal(plaintext).await,
            SealingStrategy::HardwareCredential(sealer) => sealer.seal(plaintext).await,
        }
    }

    pub async fn unseal(&self, record: &[u8]) -> Result<SecretKey, KeyStoreError> {
        match self {
            SealingStrategy::IdentityBound(sealer) => sealer.unseal(record).await,
            SealingStrategy::HardwareCredential(sealer) => sealer.unseal(record).await,
        }
    }
}

/// [`ProtectedStore`] backed by a sealing strategy and the on-disk repository.
pub struct SealingEngine {
    strategy: SealingStrategy,
    repository: KeyStoreRepository,
}

impl SealingEngine {
    pub fn new(strategy: SealingStrategy, repository: KeyStoreRepository) -> Self {
        Self {
            strategy,
            repository,
        }
    }

    pub fn repository(&self) -> &KeyStoreRepository {
        &self.repository
    }

    async fn unseal_existing(
        &self,
        id: &LogicalIdentifier,
    ) -> Result<Option<SecretKey>, KeyStoreError> {
        match self.repository.get(self.strategy.choice(), id)? {
            Some(record) => self.strategy.unseal(&record).await.map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProtectedStore for SealingEngine {
    fn strategy(&self) -> StrategyChoice {
        self.strategy.choice()
    }

    #[instrument(skip_all, fields(strategy = %self.strategy.choice()))]
    async fn encrypt(
        &self,
        id: &LogicalIdentifier,
        plaintext: &SecretKey,
        overwrite: Overwrite,
    ) -> Result<PutOutcome, KeyStoreError> {
        let existing = self.unseal_existing(id).await;
        if let Err(err) = &existing {
            // User cancellation is not a reason to replace the record.
            if *err == KeyStoreError::Cancelled {
                return Err(KeyStoreError::Cancelled);
            }
            debug!(error = %err, "existing record unreadable, it will be replaced");
        }

        let prior = PriorRecord::classify(existing, plaintext);
        if prior.decide(overwrite) != PutOutcome::Written {
            return Ok(prior.decide(overwrite));
        }

        let record = self.strategy.seal(plaintext).await?;
        self.repository
            .put(self.strategy.choice(), id, &record, prior, overwrite)
    }

    #[instrument(skip_all, fields(strategy = %self.strategy.choice()))]
    async fn decrypt(&self, id: &LogicalIdentifier) -> Result<Option<SecretKey>, KeyStoreError> {
        self.unseal_existing(id).await
    }

    async fn list_records(
        &self,
        strategy: StrategyChoice,
    ) -> Result<BTreeSet<String>, KeyStoreError> {
        Ok(self.repository.list(strategy)?.into_iter().collect())
    }

    #[instrument(skip_all, fields(strategy = %strategy, count = names.len()))]
    async fn delete_records(
        &self,
        strategy: StrategyChoice,
        names: &[LogicalIdentifier],
    ) -> Result<(), KeyStoreError> {
        let mut first_error = None;
        for name in names {
            if let Err(err) = self.repository.delete(strategy, name) {
                warn!(error = %err, "could not remove record");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::key_provider::InMemoryKeyProvider;
    use hardware::{SoftwareCredentialAuthority, DEFAULT_CREDENTIAL_NAME};

    fn identity_engine(root: &std::path::Path) -> SealingEngine {
        SealingEngine::new(
            SealingStrategy::IdentityBound(IdentitySealer::new(Arc::new(
                InMemoryKeyProvider::default(),
            ))),
            KeyStoreRepository::new(root),
        )
    }

    async fn hardware_engine(root: &std::path::Path) -> SealingEngine {
        let sealer = HardwareSealer::probe(
            Arc::new(SoftwareCredentialAuthority::default()),
            DEFAULT_CREDENTIAL_NAME,
        )
        .await
        .unwrap();
        SealingEngine::new(
            SealingStrategy::HardwareCredential(sealer),
            KeyStoreRepository::new(root),
        )
    }

    #[tokio::test]
    async fn both_strategies_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let id = LogicalIdentifier::new(r"C:\Users\x\db.kdbx");
        let secret = SecretKey::generate(256);

        for engine in [
            identity_engine(dir.path()),
            hardware_engine(dir.path()).await,
        ] {
            assert_eq!(
                engine.encrypt(&id, &secret, Overwrite::Ask).await.unwrap(),
                PutOutcome::Written
            );
            assert_eq!(engine.decrypt(&id).await.unwrap(), Some(secret.clone()));
            assert_eq!(
                engine.list_records(engine.strategy()).await.unwrap(),
                BTreeSet::from([id.record_file_name()])
            );
        }
    }

    #[tokio::test]
    async fn missing_record_decrypts_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let engine = identity_engine(dir.path());
        assert_eq!(
            engine
                .decrypt(&LogicalIdentifier::new("nothing"))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn reprotect_follows_overwrite_policy() {
        let dir = tempfile::tempdir().unwrap();
        let engine = identity_engine(dir.path());
        let id = LogicalIdentifier::new("db");
        let first = SecretKey::from_slice(b"first");
        let second = SecretKey::from_slice(b"second");
        let path = engine
            .repository()
            .path_for(StrategyChoice::IdentityBound, &id);

        engine.encrypt(&id, &first, Overwrite::Ask).await.unwrap();
        let before = std::fs::read(&path).unwrap();

        assert_eq!(
            engine.encrypt(&id, &first, Overwrite::Ask).await.unwrap(),
            PutOutcome::Unchanged
        );
        assert_eq!(
            engine.encrypt(&id, &second, Overwrite::Ask).await.unwrap(),
            PutOutcome::NeedsConfirmation
        );
        assert_eq!(std::fs::read(&path).unwrap(), before);

        assert_eq!(
            engine.encrypt(&id, &second, Overwrite::Force).await.unwrap(),
            PutOutcome::Written
        );
        assert_eq!(engine.decrypt(&id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn unreadable_record_is_replaced_without_asking() {
        let dir = tempfile::tempdir().unwrap();
        let id = LogicalIdentifier::new("db");
        identity_engine(dir.path())
            .encrypt(&id, &SecretKey::from_slice(b"other user"), Overwrite::Ask)
            .await
            .unwrap();

        // A different identity cannot unseal the old record.
        let engine = identity_engine(dir.path());
        let mine = SecretKey::from_slice(b"mine");
        assert_eq!(
            engine.encrypt(&id, &mine, Overwrite::Ask).await.unwrap(),
            PutOutcome::Written
        );
        assert_eq!(engine.decrypt(&id).await.unwrap(), Some(mine));
    }

    #[tokio::test]
    async fn delete_records_accepts_literal_names() {
        let dir = tempfile::tempdir().unwrap();
        let engine = identity_engine(dir.path());
        let id = LogicalIdentifier::new("/db/a.kdbx");
        engine
            .encrypt(&id, &SecretKey::from_slice(b"a"), Overwrite::Ask)
            .await
            .unwrap();

        let names = [LogicalIdentifier::new(id.record_file_name()), id.clone()];
        engine
            .delete_records(StrategyChoice::IdentityBound, &names)
            .await
            .unwrap();
        assert!(engine
            .list_records(StrategyChoice::IdentityBound)
            .await
            .unwrap()
            .is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn flipped_identity_records_are_corrupt(
            secret in proptest::collection::vec(any::<u8>(), 1..64),
            flip in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let engine = identity_engine(dir.path());
                let id = LogicalIdentifier::new("flip");
                engine
                    .encrypt(&id, &SecretKey::new(secret), Overwrite::Ask)
                    .await
                    .unwrap();

                let path = engine.repository().path_for(StrategyChoice::IdentityBound, &id);
                let mut record = std::fs::read(&path).unwrap();
                let idx = flip.index(record.len());
                record[idx] ^= 1 << bit;
                std::fs::write(&path, &record).unwrap();

                assert_eq!(engine.decrypt(&id).await, Err(KeyStoreError::Corrupt));
            });
        }
    }
}
