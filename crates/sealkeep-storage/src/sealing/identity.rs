use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use sealkeep_core::{KeyStoreError, SecretKey};
use tracing::debug;

use super::SEALING_ENTROPY;
use crate::key_provider::{KeyMaterial, KeyProvider};

const NONCE_LEN: usize = 12;

/// Seals records with a key that only the current OS identity can read back from its
/// keyring. Record layout: `nonce || AES-256-GCM(plaintext, aad = entropy)`.
#[derive(Clone)]
pub struct IdentitySealer {
    provider: Arc<dyn KeyProvider>,
}

impl IdentitySealer {
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self { provider }
    }

    pub async fn seal(&self, plaintext: &SecretKey) -> Result<Vec<u8>, KeyStoreError> {
        let material = self
            .provider
            .get_or_create()
            .await
            .map_err(|e| KeyStoreError::platform("loading identity key", e))?;
        let cipher = build_cipher(&material)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &SEALING_ENTROPY,
                },
            )
            .map_err(|e| KeyStoreError::platform("sealing", e))?;

        let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        record.extend_from_slice(nonce.as_slice());
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }

    /// Unseal a record. A missing identity key means the record belongs to another
    /// identity and is reported as corrupt.
    pub async fn unseal(&self, record: &[u8]) -> Result<SecretKey, KeyStoreError> {
        let Some(material) = self
            .provider
            .get_existing()
            .await
            .map_err(|e| KeyStoreError::platform("loading identity key", e))?
        else {
            debug!("no identity key for this user, record cannot be unsealed");
            return Err(KeyStoreError::Corrupt);
        };

        if record.len() <= NONCE_LEN {
            return Err(KeyStoreError::Corrupt);
        }
        let (nonce, ciphertext) = record.split_at(NONCE_LEN);
        let cipher = build_cipher(&material)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &SEALING_ENTROPY,
                },
            )
            .map(SecretKey::new)
            .map_err(|_| KeyStoreError::Corrupt)
    }
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, KeyStoreError> {
    Aes256Gcm::new_from_slice(&material.bytes[..])
        .map_err(|e| KeyStoreError::platform("initializing cipher", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::InMemoryKeyProvider;

    fn sealer() -> IdentitySealer {
        IdentitySealer::new(Arc::new(InMemoryKeyProvider::default()))
    }

    #[tokio::test]
    async fn seal_then_unseal_returns_plaintext() {
        let sealer = sealer();
        let secret = SecretKey::from_slice(b"master key bytes");
        let record = sealer.seal(&secret).await.unwrap();

        assert_ne!(&record[NONCE_LEN..], secret.as_bytes());
        assert_eq!(sealer.unseal(&record).await.unwrap(), secret);
    }

    #[tokio::test]
    async fn other_identity_cannot_unseal() {
        let record = sealer()
            .seal(&SecretKey::from_slice(b"secret"))
            .await
            .unwrap();

        // Fresh provider: no key yet.
        assert_eq!(sealer().unseal(&record).await, Err(KeyStoreError::Corrupt));

        // Provider with a different key.
        let other = sealer();
        other.seal(&SecretKey::from_slice(b"x")).await.unwrap();
        assert_eq!(other.unseal(&record).await, Err(KeyStoreError::Corrupt));
    }

    #[tokio::test]
    async fn truncated_record_is_corrupt() {
        let sealer = sealer();
        sealer.seal(&SecretKey::from_slice(b"x")).await.unwrap();
        assert_eq!(
            sealer.unseal(&[0u8; NONCE_LEN]).await,
            Err(KeyStoreError::Corrupt)
        );
    }
}
