//! Concrete protected key storage: content-addressed record files and the sealing
//! engine with its identity-bound and hardware-credential strategies.

pub mod key_provider;
pub mod repository;
pub mod sealing;
