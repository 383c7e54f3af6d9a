use std::{
    fs,
    io::Write,
    path::Path,
};

use quick_xml::{events::Event, Reader};
use sealkeep_core::{
    digest::{from_hex, to_hex, MD5_LEN},
    crypto::AES_KEY_LEN,
    KeyStoreError, LogicalIdentifier, SecretKey,
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use zeroize::Zeroizing;

/// The only document version this crate reads and writes.
pub const DOCUMENT_VERSION: &str = "1.0";

/// Root element of recovery documents.
pub const ROOT_ELEMENT: &str = "SealKeep";

/// Root element written by earlier releases.
pub const LEGACY_ROOT_ELEMENT: &str = "KeePassProtectedKeyStore";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// How the AES key that encrypts `KeyData` is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyWrapping {
    /// Random key stored in the document (`KeyDataAdditional`).
    Embedded(SecretKey),
    /// MD5 of a password-derived key (`KeyDataAdditionalHash`); the key itself is not stored.
    PasswordHash([u8; MD5_LEN]),
}

/// A structurally valid recovery document. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryDocument {
    identifier: LogicalIdentifier,
    key_data: Vec<u8>,
    key_data_hash: [u8; MD5_LEN],
    wrapping: KeyWrapping,
    exclusive: bool,
}

impl RecoveryDocument {
    pub(crate) fn new(
        identifier: LogicalIdentifier,
        key_data: Vec<u8>,
        key_data_hash: [u8; MD5_LEN],
        wrapping: KeyWrapping,
        exclusive: bool,
    ) -> Self {
        Self {
            identifier,
            key_data,
            key_data_hash,
            wrapping,
            exclusive,
        }
    }

    pub fn version(&self) -> &str {
        DOCUMENT_VERSION
    }

    pub fn identifier(&self) -> &LogicalIdentifier {
        &self.identifier
    }

    /// Encrypted key bytes.
    pub fn key_data(&self) -> &[u8] {
        &self.key_data
    }

    pub fn key_data_hash(&self) -> &[u8; MD5_LEN] {
        &self.key_data_hash
    }

    pub fn wrapping(&self) -> &KeyWrapping {
        &self.wrapping
    }

    pub fn is_password_protected(&self) -> bool {
        matches!(self.wrapping, KeyWrapping::PasswordHash(_))
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    /// Same document, pointing at a resource that has moved.
    pub fn with_identifier(mut self, identifier: LogicalIdentifier) -> Self {
        self.identifier = identifier;
        self
    }

    /// Serialized document. It may embed key material, so the buffer is zeroed on drop.
    pub fn to_xml(&self) -> Result<Zeroizing<String>, KeyStoreError> {
        let (additional, additional_hash) = match &self.wrapping {
            KeyWrapping::Embedded(key) => (Zeroizing::new(to_hex(key.as_bytes())), String::new()),
            KeyWrapping::PasswordHash(hash) => (Zeroizing::default(), to_hex(hash)),
        };
        let wire = WireDocument {
            version: DOCUMENT_VERSION.to_string(),
            identifier: self.identifier.as_str().to_string(),
            key_data: to_hex(&self.key_data),
            key_data_hash: to_hex(&self.key_data_hash),
            key_data_additional: additional,
            key_data_additional_hash: additional_hash,
            exclusive: if self.exclusive { "true" } else { "false" }.to_string(),
        };

        let mut body = Zeroizing::new(String::from(XML_DECLARATION));
        body.push('\n');
        let mut serializer = quick_xml::se::Serializer::new(&mut *body);
        serializer.indent(' ', 2);
        wire.serialize(serializer)
            .map_err(|e| KeyStoreError::io("encoding recovery document", e))?;
        body.push('\n');
        Ok(body)
    }

    /// Parse and validate a document. Any structural problem is `BadFormat`.
    pub fn from_xml(xml: &str) -> Result<Self, KeyStoreError> {
        let root = root_element(xml)?;
        if root != ROOT_ELEMENT && root != LEGACY_ROOT_ELEMENT {
            debug!(%root, "unexpected recovery document root");
            return Err(KeyStoreError::BadFormat);
        }
        let wire: WireDocument = quick_xml::de::from_str(xml).map_err(|e| {
            debug!(error = %e, "recovery document is not valid XML");
            KeyStoreError::BadFormat
        })?;
        wire.validate()
    }

    /// Write the document through a temp file next to `path`.
    pub fn save(&self, path: &Path) -> Result<(), KeyStoreError> {
        let xml = self.to_xml()?;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|e| KeyStoreError::io("writing recovery document", e))?;
        tmp.write_all(xml.as_bytes())
            .map_err(|e| KeyStoreError::io("writing recovery document", e))?;
        tmp.persist(path)
            .map_err(|e| KeyStoreError::io("writing recovery document", e.error))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, KeyStoreError> {
        let xml = Zeroizing::new(
            fs::read_to_string(path)
                .map_err(|e| KeyStoreError::io("reading recovery document", e))?,
        );
        Self::from_xml(&xml)
    }
}

/// On-disk shape, every field as text so validation can report `BadFormat`
/// instead of a deserializer error.
#[derive(Default, Serialize, Deserialize)]
#[serde(rename = "SealKeep", rename_all = "PascalCase")]
struct WireDocument {
    #[serde(default)]
    version: String,
    #[serde(default, rename = "Identifier", alias = "DBPath")]
    identifier: String,
    #[serde(default)]
    key_data: String,
    #[serde(default)]
    key_data_hash: String,
    #[serde(default)]
    key_data_additional: Zeroizing<String>,
    #[serde(default)]
    key_data_additional_hash: String,
    #[serde(default)]
    exclusive: String,
}

impl WireDocument {
    fn validate(self) -> Result<RecoveryDocument, KeyStoreError> {
        if self.version.trim() != DOCUMENT_VERSION {
            debug!(version = %self.version, "unsupported recovery document version");
            return Err(KeyStoreError::BadFormat);
        }
        let identifier = self.identifier.trim();
        if identifier.is_empty() {
            return Err(KeyStoreError::BadFormat);
        }

        let key_data = non_empty_hex(&self.key_data)?;
        let key_data_hash = md5_field(&self.key_data_hash)?;
        let exclusive = parse_bool(&self.exclusive)?;

        let additional = self.key_data_additional.trim();
        let additional_hash = self.key_data_additional_hash.trim();
        let wrapping = match (additional.is_empty(), additional_hash.is_empty()) {
            (false, true) => {
                let key = SecretKey::new(from_hex(additional)?);
                if key.len() != AES_KEY_LEN {
                    return Err(KeyStoreError::BadFormat);
                }
                KeyWrapping::Embedded(key)
            }
            (true, false) => KeyWrapping::PasswordHash(md5_field(additional_hash)?),
            _ => {
                debug!("recovery document must carry exactly one wrapping field");
                return Err(KeyStoreError::BadFormat);
            }
        };

        Ok(RecoveryDocument::new(
            LogicalIdentifier::new(identifier),
            key_data,
            key_data_hash,
            wrapping,
            exclusive,
        ))
    }
}

fn non_empty_hex(text: &str) -> Result<Vec<u8>, KeyStoreError> {
    let bytes = from_hex(text)?;
    if bytes.is_empty() {
        return Err(KeyStoreError::BadFormat);
    }
    Ok(bytes)
}

fn md5_field(text: &str) -> Result<[u8; MD5_LEN], KeyStoreError> {
    non_empty_hex(text)?
        .try_into()
        .map_err(|_| KeyStoreError::BadFormat)
}

fn parse_bool(text: &str) -> Result<bool, KeyStoreError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(KeyStoreError::BadFormat),
    }
}

fn root_element(xml: &str) -> Result<String, KeyStoreError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => return Err(KeyStoreError::BadFormat),
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "recovery document is not valid XML");
                return Err(KeyStoreError::BadFormat);
            }
        }
    }
}
