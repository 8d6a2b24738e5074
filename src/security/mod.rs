// src/security/mod.rs
//! Security-related functionality: passphrase encryption of key material,
//! passphrase policy, zeroizing buffers and log redaction.

pub mod custodian;
pub mod password_validator;
pub mod redaction;
pub mod secret;

pub use custodian::{CipherBlob, CipherError, KeyCustodian};
pub use password_validator::{validate_passphrase, PassphrasePolicy, PassphraseStrength};
pub use secret::SecretVec;
