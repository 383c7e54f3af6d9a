//! Portable emergency recovery documents: a protected key encrypted under a
//! self-contained AES key, independent of the platform sealing.

pub mod codec;
pub mod document;

pub use codec::{EmergencyRecoveryCodec, RecoveredKey};
pub use document::{KeyWrapping, RecoveryDocument};
