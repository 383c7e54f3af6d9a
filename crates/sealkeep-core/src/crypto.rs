//! AES-256-CBC with PKCS7 padding, shared by the hardware credential sealer and the
//! recovery codec.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::{KeyStoreError, SecretKey};

pub const AES_KEY_LEN: usize = 32;
pub const AES_BLOCK_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub fn aes_cbc_encrypt(
    key: &[u8; AES_KEY_LEN],
    iv: &[u8; AES_BLOCK_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, KeyStoreError> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| KeyStoreError::platform("initializing cipher", e))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt and unpad. Wrong key, truncated input and bad padding all report `Corrupt`.
pub fn aes_cbc_decrypt(
    key: &[u8; AES_KEY_LEN],
    iv: &[u8; AES_BLOCK_LEN],
    ciphertext: &[u8],
) -> Result<SecretKey, KeyStoreError> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(KeyStoreError::Corrupt);
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| KeyStoreError::platform("initializing cipher", e))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(SecretKey::new)
        .map_err(|_| KeyStoreError::Corrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; AES_KEY_LEN] = [7u8; AES_KEY_LEN];
    const IV: [u8; AES_BLOCK_LEN] = [9u8; AES_BLOCK_LEN];

    #[test]
    fn round_trip_pads_to_block_size() {
        let ciphertext = aes_cbc_encrypt(&KEY, &IV, b"sixteen byte msg").unwrap();
        assert_eq!(ciphertext.len(), 32);

        let plaintext = aes_cbc_decrypt(&KEY, &IV, &ciphertext).unwrap();
        assert_eq!(plaintext.as_bytes(), b"sixteen byte msg");
    }

    #[test]
    fn truncated_input_is_corrupt() {
        let ciphertext = aes_cbc_encrypt(&KEY, &IV, b"payload").unwrap();
        let err = aes_cbc_decrypt(&KEY, &IV, &ciphertext[..8]).unwrap_err();
        assert_eq!(err, KeyStoreError::Corrupt);
    }
}
