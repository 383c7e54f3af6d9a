//! Operations exposed to the host: protect and unprotect keys, export and import
//! recovery documents, list and remove records, and the host key-provider and
//! auto-login hooks.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use sealkeep_core::{
    host::{
        find_store_factor, CompositeKey, FactorMatch, HostDecisions, KeyRequest, KeySource,
        RecoveryProtection, STORE_FACTOR_NAME,
    },
    settings::ConfigurationStore,
    store::{Overwrite, ProtectedStore, PutOutcome},
    KeyStoreError, LogicalIdentifier, SecretKey, StrategyChoice,
};
use sealkeep_recovery::{EmergencyRecoveryCodec, RecoveredKey, RecoveryDocument};
use tracing::{debug, info, instrument, warn};

/// Length of a freshly generated master key factor.
pub const NEW_KEY_LEN: usize = 256;

const HEALTH_PROBE: &str = "sealkeep-health-probe";

/// Result of importing a recovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub identifier: LogicalIdentifier,
    pub exclusive: bool,
    pub outcome: PutOutcome,
}

/// A master key was created or changed for `resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKeyEvent {
    pub resource: LogicalIdentifier,
    /// The store factor should live in the shared default store.
    pub use_default_store: bool,
    /// The store factor was taken from an existing record and needs no new one.
    pub reused_existing_key: bool,
}

/// Core operations over a [`ProtectedStore`].
pub struct KeyStoreService<S: ProtectedStore> {
    store: Arc<S>,
    codec: EmergencyRecoveryCodec,
}

impl<S: ProtectedStore> KeyStoreService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            codec: EmergencyRecoveryCodec,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn strategy(&self) -> StrategyChoice {
        self.store.strategy()
    }

    /// Seal and persist `plaintext` for `id`. Replacing a different key asks the host first.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn protect(
        &self,
        id: &LogicalIdentifier,
        plaintext: &SecretKey,
        decisions: &dyn HostDecisions,
    ) -> Result<PutOutcome, KeyStoreError> {
        if id.is_empty() || plaintext.is_empty() {
            return Err(KeyStoreError::BadFormat);
        }

        match self.store.encrypt(id, plaintext, Overwrite::Ask).await? {
            PutOutcome::NeedsConfirmation => {
                if !decisions.confirm_overwrite(id) {
                    info!("replacement declined");
                    return Err(KeyStoreError::Cancelled);
                }
                self.store.encrypt(id, plaintext, Overwrite::Force).await
            }
            outcome => Ok(outcome),
        }
    }

    /// The protected key for `id`, `None` when nothing is stored.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn unprotect(
        &self,
        id: &LogicalIdentifier,
    ) -> Result<Option<SecretKey>, KeyStoreError> {
        self.store.decrypt(id).await
    }

    /// Build a recovery document for `plaintext`.
    #[instrument(skip_all, fields(id = %id))]
    pub fn export(
        &self,
        id: &LogicalIdentifier,
        plaintext: &SecretKey,
        protection: &RecoveryProtection,
        exclusive: bool,
    ) -> Result<RecoveryDocument, KeyStoreError> {
        self.codec.encode(id, plaintext, protection, exclusive)
    }

    /// Build a recovery document for the key already protected under `id`,
    /// `None` when nothing is protected there.
    pub async fn export_protected(
        &self,
        id: &LogicalIdentifier,
        protection: &RecoveryProtection,
        exclusive: bool,
    ) -> Result<Option<RecoveryDocument>, KeyStoreError> {
        let Some(plaintext) = self.unprotect(id).await? else {
            debug!("no protected key to export");
            return Ok(None);
        };
        self.export(id, &plaintext, protection, exclusive).map(Some)
    }

    /// Open a recovery document and protect its key. Password-protected documents
    /// ask the host for the password; an exclusive key is registered for auto-login.
    #[instrument(skip_all, fields(id = %document.identifier()))]
    pub async fn import(
        &self,
        document: &RecoveryDocument,
        decisions: &dyn HostDecisions,
        config: &mut ConfigurationStore,
    ) -> Result<ImportOutcome, KeyStoreError> {
        let password = if document.is_password_protected() {
            Some(decisions.verify_password().ok_or(KeyStoreError::Cancelled)?)
        } else {
            None
        };

        let RecoveredKey {
            key,
            identifier,
            exclusive,
        } = self.codec.decode(document, password.as_ref())?;

        let outcome = self.protect(&identifier, &key, decisions).await?;
        register_auto_login(config, &identifier, exclusive)?;
        Ok(ImportOutcome {
            identifier,
            exclusive,
            outcome,
        })
    }

    pub async fn list_protected(
        &self,
        strategy: StrategyChoice,
    ) -> Result<BTreeSet<String>, KeyStoreError> {
        self.store.list_records(strategy).await
    }

    /// Remove records by identifier or literal record filename.
    #[instrument(skip_all, fields(strategy = %strategy, count = ids.len()))]
    pub async fn remove_protected(
        &self,
        strategy: StrategyChoice,
        ids: &[LogicalIdentifier],
    ) -> Result<(), KeyStoreError> {
        self.store.delete_records(strategy, ids).await
    }

    /// Key bytes for the host's key provider callback.
    pub async fn provide_key(&self, request: &KeyRequest) -> Result<Option<SecretKey>, KeyStoreError> {
        match request {
            KeyRequest::CreateNew => Ok(Some(SecretKey::generate(NEW_KEY_LEN))),
            KeyRequest::OpenExisting(id) => self.unprotect(id).await,
        }
    }

    /// Key for automatic unlock of `resource`, trying its own entry and then the
    /// default store. Disabled or missing entries yield `None`.
    pub async fn auto_login_key(
        &self,
        resource: &LogicalIdentifier,
        config: &ConfigurationStore,
    ) -> Result<Option<(LogicalIdentifier, SecretKey)>, KeyStoreError> {
        for candidate in [resource.clone(), LogicalIdentifier::default_store()] {
            if config.auto_login(&candidate) != Some(true) {
                continue;
            }
            if let Some(key) = self.unprotect(&candidate).await? {
                return Ok(Some((candidate, key)));
            }
            debug!(id = %candidate, "auto-login enabled but no protected key");
        }
        Ok(None)
    }

    /// Bookkeeping after the host created a new master key for a resource.
    ///
    /// The old auto-login entry is dropped. Records for the resource are removed when
    /// the new key no longer uses this store or uses the default store. A store factor
    /// is protected again unless it was reused, and an exclusive one is registered for
    /// auto-login.
    #[instrument(skip_all, fields(resource = %event.resource))]
    pub async fn on_master_key_changed(
        &self,
        event: &MasterKeyEvent,
        key: &dyn CompositeKey,
        decisions: &dyn HostDecisions,
        config: &mut ConfigurationStore,
    ) -> Result<Option<PutOutcome>, KeyStoreError> {
        let factor = find_store_factor(key);
        config.remove_auto_login(&event.resource)?;

        if factor == FactorMatch::Absent || event.use_default_store {
            self.remove_protected(self.strategy(), std::slice::from_ref(&event.resource))
                .await?;
        }
        if factor == FactorMatch::Absent {
            return Ok(None);
        }

        let target = if event.use_default_store {
            LogicalIdentifier::default_store()
        } else {
            event.resource.clone()
        };

        let outcome = if event.reused_existing_key {
            None
        } else {
            let Some(data) = key.factor_data(STORE_FACTOR_NAME) else {
                warn!("store factor present but its data is unavailable, skipping");
                return Ok(None);
            };
            Some(self.protect(&target, &data, decisions).await?)
        };

        register_auto_login(config, &target, factor == FactorMatch::Exclusive)?;
        Ok(outcome)
    }

    /// Seal, read back and remove a probe record.
    pub async fn health_check(&self) -> Result<(), KeyStoreError> {
        let probe = LogicalIdentifier::new(HEALTH_PROBE);
        let payload = SecretKey::generate(32);
        self.store
            .encrypt(&probe, &payload, Overwrite::Force)
            .await?;
        let round_trip = self.store.decrypt(&probe).await;
        self.store
            .delete_records(self.strategy(), std::slice::from_ref(&probe))
            .await?;

        match round_trip? {
            Some(value) if value == payload => Ok(()),
            _ => Err(KeyStoreError::Corrupt),
        }
    }
}

#[async_trait]
impl<S: ProtectedStore> KeySource for KeyStoreService<S> {
    async fn key_for(&self, request: &KeyRequest) -> Result<Option<SecretKey>, KeyStoreError> {
        self.provide_key(request).await
    }
}

/// Add an auto-login entry for keys that are the only factor of their login.
pub fn register_auto_login(
    config: &mut ConfigurationStore,
    id: &LogicalIdentifier,
    exclusive: bool,
) -> Result<bool, KeyStoreError> {
    if !exclusive {
        return Ok(false);
    }
    config.add_auto_login(id)
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::Mutex,
    };

    use sealkeep_core::{
        host::FilePurpose, settings::MemoryDocumentStore, store::InMemoryProtectedStore,
    };

    use super::*;

    #[derive(Default)]
    struct ScriptedDecisions {
        confirm: bool,
        password: Option<&'static str>,
        asked: Mutex<Vec<String>>,
    }

    impl ScriptedDecisions {
        fn confirming() -> Self {
            Self {
                confirm: true,
                ..Self::default()
            }
        }

        fn with_password(password: &'static str) -> Self {
            Self {
                password: Some(password),
                ..Self::default()
            }
        }

        fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }
    }

    impl HostDecisions for ScriptedDecisions {
        fn confirm_overwrite(&self, id: &LogicalIdentifier) -> bool {
            self.asked.lock().unwrap().push(id.to_string());
            self.confirm
        }

        fn choose_strategy(&self, _hardware_supported: bool) -> Option<StrategyChoice> {
            Some(StrategyChoice::IdentityBound)
        }

        fn enter_password(&self) -> Option<RecoveryProtection> {
            Some(RecoveryProtection::RandomKey)
        }

        fn verify_password(&self) -> Option<SecretKey> {
            self.password.map(|p| SecretKey::from_slice(p.as_bytes()))
        }

        fn pick_file(&self, _purpose: FilePurpose, _initial: Option<&Path>) -> Option<PathBuf> {
            None
        }
    }

    struct Login(Vec<(&'static str, Option<&'static [u8]>)>);

    impl CompositeKey for Login {
        fn factor_names(&self) -> Vec<String> {
            self.0.iter().map(|(name, _)| name.to_string()).collect()
        }

        fn factor_data(&self, name: &str) -> Option<SecretKey> {
            self.0
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .and_then(|(_, data)| data.map(SecretKey::from_slice))
        }
    }

    fn service() -> KeyStoreService<InMemoryProtectedStore> {
        KeyStoreService::new(InMemoryProtectedStore::default())
    }

    fn config() -> ConfigurationStore {
        ConfigurationStore::load(MemoryDocumentStore::default())
    }

    #[tokio::test]
    async fn protect_asks_before_replacing() {
        let service = service();
        let id = LogicalIdentifier::new("/db/a.kdbx");
        let first = SecretKey::from_slice(b"first");
        let second = SecretKey::from_slice(b"second");

        let decline = ScriptedDecisions::default();
        assert_eq!(
            service.protect(&id, &first, &decline).await.unwrap(),
            PutOutcome::Written
        );
        assert_eq!(
            service.protect(&id, &first, &decline).await.unwrap(),
            PutOutcome::Unchanged
        );
        assert_eq!(
            service.protect(&id, &second, &decline).await,
            Err(KeyStoreError::Cancelled)
        );
        assert_eq!(decline.asked(), vec!["/db/a.kdbx".to_string()]);
        assert_eq!(service.unprotect(&id).await.unwrap(), Some(first));

        let confirm = ScriptedDecisions::confirming();
        assert_eq!(
            service.protect(&id, &second, &confirm).await.unwrap(),
            PutOutcome::Written
        );
        assert_eq!(service.unprotect(&id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn export_then_import_restores_key_and_auto_login() {
        let source = service();
        let id = LogicalIdentifier::new(r"C:\Users\x\db.kdbx");
        let key = SecretKey::generate(NEW_KEY_LEN);
        let decisions = ScriptedDecisions::with_password("hunter2");
        source.protect(&id, &key, &decisions).await.unwrap();

        let doc = source
            .export_protected(
                &id,
                &RecoveryProtection::Password(SecretKey::from_slice(b"hunter2")),
                true,
            )
            .await
            .unwrap()
            .expect("key is protected");

        // Fresh machine: empty store and settings.
        let target = service();
        let mut config = config();
        let imported = target.import(&doc, &decisions, &mut config).await.unwrap();

        assert_eq!(imported.outcome, PutOutcome::Written);
        assert!(imported.exclusive);
        assert_eq!(target.unprotect(&id).await.unwrap(), Some(key));
        assert_eq!(config.auto_login(&id), Some(true));
    }

    #[tokio::test]
    async fn import_without_password_is_cancelled() {
        let service = service();
        let doc = service
            .export(
                &LogicalIdentifier::new("x"),
                &SecretKey::from_slice(b"k"),
                &RecoveryProtection::Password(SecretKey::from_slice(b"pw")),
                false,
            )
            .unwrap();

        let mut config = config();
        assert_eq!(
            service
                .import(&doc, &ScriptedDecisions::default(), &mut config)
                .await,
            Err(KeyStoreError::Cancelled)
        );
        assert_eq!(
            service
                .import(&doc, &ScriptedDecisions::with_password("nope"), &mut config)
                .await,
            Err(KeyStoreError::AuthFailure)
        );
    }

    #[tokio::test]
    async fn provide_key_creates_or_opens() {
        let service = service();
        let created = service
            .key_for(&KeyRequest::CreateNew)
            .await
            .unwrap()
            .expect("new key");
        assert_eq!(created.len(), NEW_KEY_LEN);

        let id = LogicalIdentifier::new("/db/b.kdbx");
        assert_eq!(
            service
                .provide_key(&KeyRequest::OpenExisting(id.clone()))
                .await
                .unwrap(),
            None
        );
        service
            .protect(&id, &created, &ScriptedDecisions::default())
            .await
            .unwrap();
        assert_eq!(
            service
                .provide_key(&KeyRequest::OpenExisting(id))
                .await
                .unwrap(),
            Some(created)
        );
    }

    #[tokio::test]
    async fn auto_login_falls_back_to_default_store() {
        let service = service();
        let mut config = config();
        let shared = SecretKey::from_slice(b"shared");
        let resource = LogicalIdentifier::new("/db/c.kdbx");
        let decisions = ScriptedDecisions::default();

        assert_eq!(service.auto_login_key(&resource, &config).await.unwrap(), None);

        service
            .protect(&LogicalIdentifier::default_store(), &shared, &decisions)
            .await
            .unwrap();
        config
            .add_auto_login(&LogicalIdentifier::default_store())
            .unwrap();

        let (used, key) = service
            .auto_login_key(&resource, &config)
            .await
            .unwrap()
            .expect("default store key");
        assert!(used.is_default());
        assert_eq!(key, shared);

        config
            .set_auto_login_enabled(&LogicalIdentifier::default_store(), false)
            .unwrap();
        assert_eq!(service.auto_login_key(&resource, &config).await.unwrap(), None);
    }

    #[tokio::test]
    async fn master_key_change_reprotects_exclusive_factor() {
        let service = service();
        let mut config = config();
        let event = MasterKeyEvent {
            resource: LogicalIdentifier::new("/db/d.kdbx"),
            use_default_store: false,
            reused_existing_key: false,
        };
        let login = Login(vec![("SealKeep", Some(b"new factor".as_slice()))]);

        let outcome = service
            .on_master_key_changed(&event, &login, &ScriptedDecisions::confirming(), &mut config)
            .await
            .unwrap();

        assert_eq!(outcome, Some(PutOutcome::Written));
        assert_eq!(
            service.unprotect(&event.resource).await.unwrap(),
            Some(SecretKey::from_slice(b"new factor"))
        );
        assert_eq!(config.auto_login(&event.resource), Some(true));
    }

    #[tokio::test]
    async fn export_of_unprotected_key_is_none() {
        let service = service();
        let exported = service
            .export_protected(
                &LogicalIdentifier::new("/db/missing.kdbx"),
                &RecoveryProtection::RandomKey,
                false,
            )
            .await
            .unwrap();
        assert!(exported.is_none());
    }

    #[tokio::test]
    async fn master_key_change_without_factor_data_is_skipped() {
        let service = service();
        let mut config = config();
        let event = MasterKeyEvent {
            resource: LogicalIdentifier::new("/db/e.kdbx"),
            use_default_store: false,
            reused_existing_key: false,
        };
        let login = Login(vec![("SealKeep", None)]);

        let outcome = service
            .on_master_key_changed(&event, &login, &ScriptedDecisions::confirming(), &mut config)
            .await
            .unwrap();

        assert_eq!(outcome, None);
        assert_eq!(service.unprotect(&event.resource).await.unwrap(), None);
        assert_eq!(config.auto_login(&event.resource), None);
    }

    #[tokio::test]
    async fn master_key_change_without_store_cleans_up() {
        let service = service();
        let mut config = config();
        let resource = LogicalIdentifier::new("/db/e.kdbx");
        service
            .protect(&resource, &SecretKey::from_slice(b"old"), &ScriptedDecisions::default())
            .await
            .unwrap();
        config.add_auto_login(&resource).unwrap();

        let event = MasterKeyEvent {
            resource: resource.clone(),
            use_default_store: false,
            reused_existing_key: false,
        };
        let login = Login(vec![("Password", None)]);
        let outcome = service
            .on_master_key_changed(&event, &login, &ScriptedDecisions::default(), &mut config)
            .await
            .unwrap();

        assert_eq!(outcome, None);
        assert_eq!(service.unprotect(&resource).await.unwrap(), None);
        assert_eq!(config.auto_login(&resource), None);
    }

    #[tokio::test]
    async fn shared_factor_in_default_store_is_not_auto_login() {
        let service = service();
        let mut config = config();
        let event = MasterKeyEvent {
            resource: LogicalIdentifier::new("/db/f.kdbx"),
            use_default_store: true,
            reused_existing_key: false,
        };
        let login = Login(vec![
            ("Password", None),
            ("SealKeep", Some(b"shared".as_slice())),
        ]);

        service
            .on_master_key_changed(&event, &login, &ScriptedDecisions::default(), &mut config)
            .await
            .unwrap();

        assert_eq!(
            service
                .unprotect(&LogicalIdentifier::default_store())
                .await
                .unwrap(),
            Some(SecretKey::from_slice(b"shared"))
        );
        assert!(config.auto_logins().is_empty());
    }

    #[tokio::test]
    async fn list_and_remove_by_literal_name() {
        let service = service();
        let id = LogicalIdentifier::new("/db/g.kdbx");
        service
            .protect(&id, &SecretKey::from_slice(b"g"), &ScriptedDecisions::default())
            .await
            .unwrap();

        let listed = service
            .list_protected(StrategyChoice::IdentityBound)
            .await
            .unwrap();
        assert_eq!(listed, BTreeSet::from([id.record_file_name()]));

        let literal: Vec<LogicalIdentifier> = listed.into_iter().map(LogicalIdentifier::new).collect();
        service
            .remove_protected(StrategyChoice::IdentityBound, &literal)
            .await
            .unwrap();
        assert!(service
            .list_protected(StrategyChoice::IdentityBound)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn health_check_leaves_no_record() {
        let service = service();
        service.health_check().await.unwrap();
        assert!(service
            .list_protected(StrategyChoice::IdentityBound)
            .await
            .unwrap()
            .is_empty());
    }
}
