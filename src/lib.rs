// src/lib.rs
//! Air-gapped custody: keys are generated and used on an offline machine,
//! and everything that crosses to the networked machine is an immutable
//! JSON artifact on disk.

pub mod cli;
pub mod core;
pub mod crypto;
pub mod keychain;
pub mod prompt;
pub mod provider;
pub mod recovery;
pub mod security;
pub mod shamir;
pub mod stager;
pub mod storage;

pub use crate::core::errors::{CustodyError, CustodyResult};
