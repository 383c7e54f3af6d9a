use sealkeep_core::{
    crypto::{aes_cbc_decrypt, aes_cbc_encrypt, AES_KEY_LEN},
    digest::{constant_time_eq, md5},
    host::RecoveryProtection,
    KeyStoreError, LogicalIdentifier, SecretKey,
};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::document::{KeyWrapping, RecoveryDocument};

/// IV for the recovery key cipher.
pub const RECOVERY_IV: [u8; 16] = [
    0x76, 0x82, 0x62, 0xB7, 0x7F, 0x8D, 0x41, 0xDB, 0x85, 0xBD, 0x81, 0x4A, 0x59, 0x62, 0xA4, 0x02,
];

/// Passwords longer than this are truncated by [`derive_password_key`].
pub const MAX_PASSWORD_LEN: usize = AES_KEY_LEN;

/// Key recovered from a valid document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredKey {
    pub key: SecretKey,
    pub identifier: LogicalIdentifier,
    pub exclusive: bool,
}

/// Left-align the password bytes in a zeroed 256-bit buffer, truncating longer input.
pub fn derive_password_key(password: &[u8]) -> Zeroizing<[u8; AES_KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
    let len = password.len().min(AES_KEY_LEN);
    key[..len].copy_from_slice(&password[..len]);
    key
}

/// True when `password` is longer than the derivation keeps.
pub fn password_is_truncated(password: &[u8]) -> bool {
    password.len() > MAX_PASSWORD_LEN
}

/// Builds and opens recovery documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmergencyRecoveryCodec;

impl EmergencyRecoveryCodec {
    #[instrument(skip_all, fields(password = matches!(protection, RecoveryProtection::Password(_))))]
    pub fn encode(
        &self,
        identifier: &LogicalIdentifier,
        plaintext: &SecretKey,
        protection: &RecoveryProtection,
        exclusive: bool,
    ) -> Result<RecoveryDocument, KeyStoreError> {
        if identifier.is_empty() || plaintext.is_empty() {
            return Err(KeyStoreError::BadFormat);
        }

        let key_hash = md5(plaintext.as_bytes());
        let (aes_key, wrapping) = match protection {
            RecoveryProtection::RandomKey => {
                let key = SecretKey::generate(AES_KEY_LEN);
                let aes_key = to_key_array(&key)?;
                (aes_key, KeyWrapping::Embedded(key))
            }
            RecoveryProtection::Password(password) => {
                if password.is_empty() {
                    return Err(KeyStoreError::AuthFailure);
                }
                let aes_key = derive_password_key(password.as_bytes());
                let hash = md5(&aes_key[..]);
                (aes_key, KeyWrapping::PasswordHash(hash))
            }
        };

        let key_data = aes_cbc_encrypt(&aes_key, &RECOVERY_IV, plaintext.as_bytes())?;
        Ok(RecoveryDocument::new(
            identifier.clone(),
            key_data,
            key_hash,
            wrapping,
            exclusive,
        ))
    }

    /// Open a validated document. The password is only consulted for password-protected
    /// documents; a missing or wrong one fails before any decryption.
    #[instrument(skip_all, fields(password = document.is_password_protected()))]
    pub fn decode(
        &self,
        document: &RecoveryDocument,
        password: Option<&SecretKey>,
    ) -> Result<RecoveredKey, KeyStoreError> {
        let aes_key = match document.wrapping() {
            KeyWrapping::Embedded(key) => to_key_array(key)?,
            KeyWrapping::PasswordHash(expected) => {
                let Some(password) = password else {
                    return Err(KeyStoreError::AuthFailure);
                };
                let derived = derive_password_key(password.as_bytes());
                if !constant_time_eq(&md5(&derived[..]), expected) {
                    debug!("recovery password rejected");
                    return Err(KeyStoreError::AuthFailure);
                }
                derived
            }
        };

        let key = aes_cbc_decrypt(&aes_key, &RECOVERY_IV, document.key_data())?;
        if !constant_time_eq(&md5(key.as_bytes()), document.key_data_hash()) {
            debug!("recovered key does not match its hash");
            return Err(KeyStoreError::Corrupt);
        }

        Ok(RecoveredKey {
            key,
            identifier: document.identifier().clone(),
            exclusive: document.exclusive(),
        })
    }

    /// Parse, validate and open a document in one step.
    pub fn decode_xml(
        &self,
        xml: &str,
        password: Option<&SecretKey>,
    ) -> Result<RecoveredKey, KeyStoreError> {
        let document = RecoveryDocument::from_xml(xml)?;
        self.decode(&document, password)
    }
}

fn to_key_array(key: &SecretKey) -> Result<Zeroizing<[u8; AES_KEY_LEN]>, KeyStoreError> {
    if key.len() != AES_KEY_LEN {
        return Err(KeyStoreError::BadFormat);
    }
    let mut out = Zeroizing::new([0u8; AES_KEY_LEN]);
    out.copy_from_slice(key.as_bytes());
    Ok(out)
}
