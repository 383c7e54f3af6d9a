use std::fmt::Display;

use thiserror::Error;
use tracing::debug;

/// Errors surfaced by SealKeep operations.
///
/// Messages are deliberately generic: file paths and raw platform error text are
/// logged at `debug` when the error is built and then dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// No record exists. Callers normally see `Ok(None)` instead.
    #[error("no protected key exists for this identifier")]
    NotFound,
    /// Hash mismatch or decryption failure on read.
    #[error("the protected key data is corrupt or cannot be decrypted")]
    Corrupt,
    /// Hardware credential sealing was requested on a platform without support.
    #[error("hardware credential sealing is not supported on this platform")]
    PlatformUnsupported,
    /// Filesystem denied or unavailable.
    #[error("storage failure while {operation}")]
    IoFailure { operation: &'static str },
    /// Recovery document failed structural validation.
    #[error("the recovery document is not in the expected format")]
    BadFormat,
    /// Supplied password does not match the stored wrapping-key hash.
    #[error("the password does not match the recovery document")]
    AuthFailure,
    /// The platform sealing service (keyring, credential) failed.
    #[error("the platform sealing service failed while {operation}")]
    Platform { operation: &'static str },
    /// The user declined a confirmation or prompt.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl KeyStoreError {
    /// Build an [`KeyStoreError::IoFailure`], logging the underlying cause.
    pub fn io(operation: &'static str, cause: impl Display) -> Self {
        debug!(operation, error = %cause, "storage failure");
        Self::IoFailure { operation }
    }

    /// Build a [`KeyStoreError::Platform`], logging the underlying cause.
    pub fn platform(operation: &'static str, cause: impl Display) -> Self {
        debug!(operation, error = %cause, "platform sealing failure");
        Self::Platform { operation }
    }
}
