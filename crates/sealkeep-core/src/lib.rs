//! Core contracts for SealKeep: identifiers, secret buffers, the error taxonomy,
//! the protected store contract and the host collaborator traits.
//! Concrete sealing and persistence live in `sealkeep-storage`.

pub mod crypto;
pub mod digest;
pub mod error;
pub mod host;
pub mod identifier;
pub mod secret;
pub mod settings;
pub mod store;
pub mod strategy;

pub use error::KeyStoreError;
pub use identifier::LogicalIdentifier;
pub use secret::SecretKey;
pub use strategy::StrategyChoice;
