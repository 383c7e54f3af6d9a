use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use sealkeep_core::{
    crypto::{aes_cbc_decrypt, aes_cbc_encrypt, AES_KEY_LEN},
    digest::constant_time_eq,
    KeyStoreError, SecretKey,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use super::{
    foreground::{AssistConfig, ForegroundAssist, NoPromptWindow, PromptWindow},
    SEALING_ENTROPY,
};

/// Credential name used when none is configured.
pub const DEFAULT_CREDENTIAL_NAME: &str = "SealKeep";

/// Fixed challenge signed once per process to derive the sealing key.
pub const SIGN_CHALLENGE: [u8; 16] = [
    0x3E, 0xF5, 0xCB, 0x02, 0xB7, 0x40, 0x47, 0xE2, 0xB5, 0xD6, 0x3D, 0x77, 0x0D, 0x70, 0x0E, 0x9E,
];

const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("credential not found")]
    NotFound,
    #[error("user cancelled verification")]
    UserCancelled,
    #[error("credential operation failed: {0}")]
    Failed(String),
}

/// Platform service that owns hardware-backed credentials.
#[async_trait]
pub trait CredentialAuthority: Send + Sync {
    /// Platform-support probe.
    async fn is_supported(&self) -> bool;

    async fn open(&self, name: &str) -> Result<Box<dyn HardwareCredential>, CredentialError>;

    /// Create the credential, replacing any existing one with the same name.
    async fn create_replacing(
        &self,
        name: &str,
    ) -> Result<Box<dyn HardwareCredential>, CredentialError>;
}

/// One hardware-backed credential. Signing triggers interactive user verification.
#[async_trait]
pub trait HardwareCredential: Send + Sync {
    async fn request_sign(&self, data: &[u8]) -> Result<Vec<u8>, CredentialError>;
}

/// Seals records with AES-256-CBC under a key derived from a credential signature.
/// Record layout: `AES-CBC(plaintext || SHA-256(plaintext))`, IV = entropy.
pub struct HardwareSealer {
    authority: Arc<dyn CredentialAuthority>,
    credential_name: String,
    window: Arc<dyn PromptWindow>,
    assist: AssistConfig,
    key: OnceCell<Zeroizing<[u8; AES_KEY_LEN]>>,
}

impl std::fmt::Debug for HardwareSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSealer")
            .field("credential_name", &self.credential_name)
            .field("key_cached", &self.key.initialized())
            .finish()
    }
}

impl HardwareSealer {
    /// Probe the platform and build the sealer. Fails with `PlatformUnsupported`
    /// when the authority reports no hardware credential support.
    pub async fn probe(
        authority: Arc<dyn CredentialAuthority>,
        credential_name: impl Into<String>,
    ) -> Result<Self, KeyStoreError> {
        if !authority.is_supported().await {
            return Err(KeyStoreError::PlatformUnsupported);
        }
        Ok(Self {
            authority,
            credential_name: credential_name.into(),
            window: Arc::new(NoPromptWindow),
            assist: AssistConfig::default(),
            key: OnceCell::new(),
        })
    }

    pub fn with_prompt_window(mut self, window: Arc<dyn PromptWindow>, assist: AssistConfig) -> Self {
        self.window = window;
        self.assist = assist;
        self
    }

    pub async fn seal(&self, plaintext: &SecretKey) -> Result<Vec<u8>, KeyStoreError> {
        let key = self.key().await?;
        let mut payload = Zeroizing::new(Vec::with_capacity(plaintext.len() + DIGEST_LEN));
        payload.extend_from_slice(plaintext.as_bytes());
        payload.extend_from_slice(&Sha256::digest(plaintext.as_bytes()));
        aes_cbc_encrypt(key, &SEALING_ENTROPY, &payload)
    }

    pub async fn unseal(&self, record: &[u8]) -> Result<SecretKey, KeyStoreError> {
        let key = self.key().await?;
        let payload = aes_cbc_decrypt(key, &SEALING_ENTROPY, record)?;
        let bytes = payload.as_bytes();
        if bytes.len() < DIGEST_LEN {
            return Err(KeyStoreError::Corrupt);
        }
        let (plaintext, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        if !constant_time_eq(&Sha256::digest(plaintext), digest) {
            debug!("hardware record digest mismatch");
            return Err(KeyStoreError::Corrupt);
        }
        Ok(SecretKey::from_slice(plaintext))
    }

    async fn key(&self) -> Result<&[u8; AES_KEY_LEN], KeyStoreError> {
        let key = self.key.get_or_try_init(|| self.derive_key()).await?;
        Ok(&**key)
    }

    #[instrument(skip_all, fields(credential = %self.credential_name))]
    async fn derive_key(&self) -> Result<Zeroizing<[u8; AES_KEY_LEN]>, KeyStoreError> {
        let credential = match self.authority.open(&self.credential_name).await {
            Ok(credential) => credential,
            Err(err) => {
                debug!(error = %err, "opening credential failed, creating a replacement");
                self.authority
                    .create_replacing(&self.credential_name)
                    .await
                    .map_err(map_credential_error("creating credential"))?
            }
        };

        let assist = ForegroundAssist::spawn(self.window.clone(), self.assist);
        let signed = credential.request_sign(&SIGN_CHALLENGE).await;
        let exit = assist.finish().await;
        debug!(?exit, "foreground assist stopped");

        let signature =
            Zeroizing::new(signed.map_err(map_credential_error("signing challenge"))?);
        let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
        key.copy_from_slice(&Sha256::digest(&signature[..]));
        info!("hardware sealing key derived");
        Ok(key)
    }
}

fn map_credential_error(operation: &'static str) -> impl Fn(CredentialError) -> KeyStoreError {
    move |err| match err {
        CredentialError::UserCancelled => KeyStoreError::Cancelled,
        other => {
            warn!(operation, "hardware credential failure");
            KeyStoreError::platform(operation, other)
        }
    }
}

/// Authority for platforms without hardware credential support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentialAuthority;

#[async_trait]
impl CredentialAuthority for NoCredentialAuthority {
    async fn is_supported(&self) -> bool {
        false
    }

    async fn open(&self, _name: &str) -> Result<Box<dyn HardwareCredential>, CredentialError> {
        Err(CredentialError::Failed("unsupported".into()))
    }

    async fn create_replacing(
        &self,
        _name: &str,
    ) -> Result<Box<dyn HardwareCredential>, CredentialError> {
        Err(CredentialError::Failed("unsupported".into()))
    }
}

/// Software stand-in for a hardware credential store, used in tests and smoke runs.
/// Signatures are `SHA-256(secret || data)`. This is not hardware-backed.
#[derive(Debug, Clone)]
pub struct SoftwareCredentialAuthority {
    supported: bool,
    cancel_signing: bool,
    credentials: Arc<Mutex<Vec<(String, [u8; 32])>>>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    creates: AtomicUsize,
    signs: Arc<AtomicUsize>,
}

impl Default for SoftwareCredentialAuthority {
    fn default() -> Self {
        Self {
            supported: true,
            cancel_signing: false,
            credentials: Arc::default(),
            counters: Arc::default(),
        }
    }
}

impl SoftwareCredentialAuthority {
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::default()
        }
    }

    /// Every signing request reports that the user cancelled verification.
    pub fn cancelling() -> Self {
        Self {
            cancel_signing: true,
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.counters.creates.load(Ordering::SeqCst)
    }

    pub fn signs(&self) -> usize {
        self.counters.signs.load(Ordering::SeqCst)
    }

    fn credential(&self, secret: [u8; 32]) -> Box<dyn HardwareCredential> {
        Box::new(SoftwareCredential {
            secret: Zeroizing::new(secret),
            cancel: self.cancel_signing,
            signs: self.counters.signs.clone(),
        })
    }
}

#[async_trait]
impl CredentialAuthority for SoftwareCredentialAuthority {
    async fn is_supported(&self) -> bool {
        self.supported
    }

    async fn open(&self, name: &str) -> Result<Box<dyn HardwareCredential>, CredentialError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let credentials = self
            .credentials
            .lock()
            .map_err(|e| CredentialError::Failed(e.to_string()))?;
        credentials
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, secret)| self.credential(*secret))
            .ok_or(CredentialError::NotFound)
    }

    async fn create_replacing(
        &self,
        name: &str,
    ) -> Result<Box<dyn HardwareCredential>, CredentialError> {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        let secret: [u8; 32] = SecretKey::generate(32)
            .as_bytes()
            .try_into()
            .map_err(|_| CredentialError::Failed("key generation".into()))?;
        let mut credentials = self
            .credentials
            .lock()
            .map_err(|e| CredentialError::Failed(e.to_string()))?;
        credentials.retain(|(existing, _)| existing != name);
        credentials.push((name.to_string(), secret));
        Ok(self.credential(secret))
    }
}

struct SoftwareCredential {
    secret: Zeroizing<[u8; 32]>,
    cancel: bool,
    signs: Arc<AtomicUsize>,
}

#[async_trait]
impl HardwareCredential for SoftwareCredential {
    async fn request_sign(&self, data: &[u8]) -> Result<Vec<u8>, CredentialError> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        if self.cancel {
            return Err(CredentialError::UserCancelled);
        }
        let mut hasher = Sha256::new();
        hasher.update(&self.secret[..]);
        hasher.update(data);
        Ok(hasher.finalize().to_vec())
    }
}
