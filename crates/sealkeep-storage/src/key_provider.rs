use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

/// Length of the identity sealing key.
pub const SEALING_KEY_LEN: usize = 32;

/// Identity-scoped key used to seal records for the current user.
#[derive(Clone)]
pub struct KeyMaterial {
    /// Identifier for logging (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key, zeroed on drop.
    pub bytes: Zeroizing<[u8; SEALING_KEY_LEN]>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides the identity sealing key (OS keyring in production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Return the key, creating and storing one on first use.
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;

    /// Return the key only if this identity already has one.
    async fn get_existing(&self) -> Result<Option<KeyMaterial>, KeyError>;
}

/// OS keyring-backed provider. The keyring entry is readable only by the logged-in
/// user, which is what binds sealed records to that identity.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &self.account).map_err(|e| KeyError::Keyring(e.to_string()))
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(secret) => decode_key(&self.account, &secret),
            Err(keyring::Error::NoEntry) => {
                let material = generate_key(&self.account);
                entry
                    .set_password(&encode_key(&material))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                info!(key = %material.id, "created identity sealing key");
                Ok(material)
            }
            // Any other failure must not mint a new key: that would orphan existing records.
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }

    async fn get_existing(&self) -> Result<Option<KeyMaterial>, KeyError> {
        match self.entry()?.get_password() {
            Ok(secret) => decode_key(&self.account, &secret).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = generate_key("memory");
        *guard = Some(material.clone());
        Ok(material)
    }

    async fn get_existing(&self) -> Result<Option<KeyMaterial>, KeyError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;
        Ok(guard.clone())
    }
}

fn generate_key(id: &str) -> KeyMaterial {
    let mut bytes = Zeroizing::new([0u8; SEALING_KEY_LEN]);
    OsRng.fill_bytes(&mut bytes[..]);
    KeyMaterial {
        id: id.to_string(),
        bytes,
    }
}

fn encode_key(material: &KeyMaterial) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD.encode(&material.bytes[..]))
}

fn decode_key(id: &str, secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| KeyError::Decode(e.to_string()))?,
    );

    if bytes.len() != SEALING_KEY_LEN {
        return Err(KeyError::Decode(format!(
            "expected {SEALING_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = Zeroizing::new([0u8; SEALING_KEY_LEN]);
    out.copy_from_slice(&bytes);
    Ok(KeyMaterial {
        id: id.to_string(),
        bytes: out,
    })
}
