use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::{eyre::eyre, Result};
use sealkeep_core::{
    host::{FilePurpose, HostDecisions, KeyRequest},
    settings::ConfigurationStore,
    store::{ProtectedStore, PutOutcome},
    KeyStoreError, LogicalIdentifier, SecretKey, StrategyChoice,
};
use sealkeep_recovery::RecoveryDocument;
use sealkeep_service::{register_auto_login, KeyStoreService};
use tracing::debug;
use zeroize::Zeroizing;

use crate::cli::ProtectArgs;

/// Everything a key command needs for one run.
pub struct Session<'a, S: ProtectedStore> {
    pub service: KeyStoreService<S>,
    pub settings: &'a mut ConfigurationStore,
    pub decisions: &'a dyn HostDecisions,
}

impl<S: ProtectedStore> Session<'_, S> {
    pub async fn protect(&mut self, args: ProtectArgs) -> Result<()> {
        let id = LogicalIdentifier::new(args.id);
        let key = match &args.key_file {
            Some(path) => read_key_file(path)?,
            None => self
                .service
                .provide_key(&KeyRequest::CreateNew)
                .await?
                .ok_or_else(|| eyre!("no key generated"))?,
        };

        let outcome = self.service.protect(&id, &key, self.decisions).await?;
        match outcome {
            PutOutcome::Written => println!("Protected key for {id}."),
            PutOutcome::Unchanged => println!("The same key is already protected for {id}."),
            PutOutcome::NeedsConfirmation => println!("Key for {id} left unchanged."),
        }
        if register_auto_login(self.settings, &id, args.exclusive)? {
            println!("Auto-login entry added for {id}.");
        }
        Ok(())
    }

    pub async fn unprotect(&self, id: String, output: Option<PathBuf>) -> Result<()> {
        let id = LogicalIdentifier::new(id);
        let key = self
            .service
            .unprotect(&id)
            .await?
            .ok_or_else(|| eyre!("no key is protected for {id}"))?;

        match output {
            Some(path) => {
                fs::write(&path, key.as_bytes())?;
                println!("Key written to {}", path.display());
            }
            None => println!("{}", *Zeroizing::new(hex::encode_upper(key.as_bytes()))),
        }
        Ok(())
    }

    pub async fn export(&mut self, id: String, output: Option<PathBuf>, exclusive: bool) -> Result<()> {
        let id = LogicalIdentifier::new(id);
        let protection = self
            .decisions
            .enter_password()
            .ok_or(KeyStoreError::Cancelled)?;
        let document = self
            .service
            .export_protected(&id, &protection, exclusive)
            .await?
            .ok_or_else(|| eyre!("no key is protected for {id}"))?;

        let path = match output {
            Some(path) => path,
            None => self
                .decisions
                .pick_file(FilePurpose::SaveRecoveryDocument, self.settings.last_directory())
                .ok_or(KeyStoreError::Cancelled)?,
        };
        document.save(&path)?;
        self.remember_directory(&path)?;
        println!("Recovery document written to {}", path.display());
        Ok(())
    }

    pub async fn import(&mut self, file: Option<PathBuf>, resource: Option<String>) -> Result<()> {
        let path = match file {
            Some(path) => path,
            None => self
                .decisions
                .pick_file(FilePurpose::OpenRecoveryDocument, self.settings.last_directory())
                .ok_or(KeyStoreError::Cancelled)?,
        };
        let document = self.relocate(RecoveryDocument::load(&path)?, resource);
        let imported = self
            .service
            .import(&document, self.decisions, self.settings)
            .await?;
        self.remember_directory(&path)?;

        match imported.outcome {
            PutOutcome::Unchanged => println!(
                "The key for {} was already protected.",
                imported.identifier
            ),
            _ => println!("Key for {} restored.", imported.identifier),
        }
        Ok(())
    }

    pub async fn list(&self, strategy: StrategyChoice) -> Result<()> {
        let names = self.service.list_protected(strategy).await?;
        if names.is_empty() {
            println!("No protected keys for {strategy}.");
            return Ok(());
        }
        for name in names {
            println!("{name}");
        }
        Ok(())
    }

    pub async fn remove(&mut self, strategy: StrategyChoice, ids: Vec<String>) -> Result<()> {
        let ids: Vec<LogicalIdentifier> = ids.into_iter().map(LogicalIdentifier::new).collect();
        self.service.remove_protected(strategy, &ids).await?;
        for id in &ids {
            self.settings.remove_auto_login(id)?;
        }
        println!("Removed {} record(s) from {strategy}.", ids.len());
        Ok(())
    }

    /// Point the document at the resource's current location when it has moved.
    fn relocate(&self, document: RecoveryDocument, resource: Option<String>) -> RecoveryDocument {
        if let Some(resource) = resource {
            return document.with_identifier(LogicalIdentifier::new(resource));
        }
        let id = document.identifier();
        if id.is_default() || Path::new(id.as_str()).exists() {
            return document;
        }
        debug!(%id, "resource not found at recorded location");
        match self.decisions.pick_file(FilePurpose::LocateResource, None) {
            Some(moved) => document.with_identifier(LogicalIdentifier::new(
                moved.to_string_lossy().into_owned(),
            )),
            None => document,
        }
    }

    fn remember_directory(&mut self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            self.settings.set_last_directory(dir)?;
        }
        Ok(())
    }
}

fn read_key_file(path: &Path) -> Result<SecretKey> {
    let key = SecretKey::new(fs::read(path)?);
    if key.is_empty() {
        return Err(eyre!("key file {} is empty", path.display()));
    }
    Ok(key)
}
