use std::{
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

use crate::digest;

/// Sentinel identifier for the shared key store used by several resources.
pub const DEFAULT_IDENTIFIER: &str = "default";

/// Extension of every key store record file.
pub const RECORD_EXTENSION: &str = ".bin";

/// Case-insensitive name of a protected secret (a resource path or [`DEFAULT_IDENTIFIER`]).
///
/// Equality and hashing use the lowercased form; the original spelling is kept for
/// display.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LogicalIdentifier {
    original: String,
    folded: String,
}

impl LogicalIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        let original = value.into();
        let folded = original.to_lowercase();
        Self { original, folded }
    }

    /// The shared default key store.
    pub fn default_store() -> Self {
        Self::new(DEFAULT_IDENTIFIER)
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Lowercased form used for comparison and hashing.
    pub fn folded(&self) -> &str {
        &self.folded
    }

    pub fn is_default(&self) -> bool {
        self.folded == DEFAULT_IDENTIFIER
    }

    pub fn is_empty(&self) -> bool {
        self.original.trim().is_empty()
    }

    /// True when the identifier already names a record file and must not be hashed.
    /// Only bare filenames qualify; anything with a path separator is hashed.
    pub fn is_record_file_name(&self) -> bool {
        self.folded.ends_with(RECORD_EXTENSION)
            && self.folded.len() > RECORD_EXTENSION.len()
            && !self.folded.contains(['/', '\\', ':'])
    }

    /// Content-addressed record filename: `hex(md5(utf32le(lowercase(id)))) + ".bin"`.
    /// Literal filenames are normalised to an uppercase stem so that equal
    /// identifiers always name the same file.
    pub fn record_file_name(&self) -> String {
        if self.is_record_file_name() {
            let stem = &self.folded[..self.folded.len() - RECORD_EXTENSION.len()];
            return format!("{}{}", stem.to_uppercase(), RECORD_EXTENSION);
        }
        let digest = digest::md5(&digest::utf32_le(&self.folded));
        format!("{}{}", digest::to_hex(&digest), RECORD_EXTENSION)
    }
}

impl PartialEq for LogicalIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for LogicalIdentifier {}

impl Hash for LogicalIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl fmt::Debug for LogicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LogicalIdentifier")
            .field(&self.original)
            .finish()
    }
}

impl fmt::Display for LogicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl From<String> for LogicalIdentifier {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for LogicalIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<LogicalIdentifier> for String {
    fn from(value: LogicalIdentifier) -> Self {
        value.original
    }
}
