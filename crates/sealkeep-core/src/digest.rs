//! Hashing and byte/hex conversion helpers shared by the repository and the
//! recovery codec. MD5 is used for addressing and corruption checks only.

use crate::KeyStoreError;

/// Length in bytes of an MD5 digest.
pub const MD5_LEN: usize = 16;

pub fn md5(data: &[u8]) -> [u8; MD5_LEN] {
    md5::compute(data).0
}

/// Uppercase hex, matching the record filenames and recovery documents on disk.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Decode hex of either case. Malformed input is a format error.
pub fn from_hex(text: &str) -> Result<Vec<u8>, KeyStoreError> {
    hex::decode(text.trim()).map_err(|_| KeyStoreError::BadFormat)
}

/// UTF-32 little-endian encoding, used when hashing identifiers.
pub fn utf32_le(text: &str) -> Vec<u8> {
    text.chars()
        .flat_map(|c| u32::from(c).to_le_bytes())
        .collect()
}

/// Length-checked comparison that does not short-circuit on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_vector() {
        assert_eq!(to_hex(&md5(b"")), "D41D8CD98F00B204E9800998ECF8427E");
    }

    #[test]
    fn hex_accepts_lowercase_and_rejects_garbage() {
        assert_eq!(from_hex("0aff").unwrap(), vec![0x0a, 0xff]);
        assert_eq!(from_hex("xyz"), Err(KeyStoreError::BadFormat));
        assert_eq!(from_hex("abc"), Err(KeyStoreError::BadFormat));
    }

    #[test]
    fn utf32_encodes_four_bytes_per_char() {
        assert_eq!(utf32_le("a"), vec![0x61, 0, 0, 0]);
        assert_eq!(utf32_le("é").len(), 4);
    }

    #[test]
    fn constant_time_eq_checks_length_and_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
