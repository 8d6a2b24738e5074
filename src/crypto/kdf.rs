use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use scrypt::Params;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::security::SecretVec;

/// PBKDF2 iteration count used when nothing else is configured.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KdfError {
    #[error("invalid KDF parameters: {0}")]
    InvalidParameters(String),
    #[error("key derivation failed: {0}")]
    DerivationFailed(String),
}

/// Password-based KDF together with its cost parameters.
///
/// Serialized into every cipher blob so decryption never depends on the
/// current configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kdf", rename_all = "lowercase")]
pub enum PasswordKdf {
    Pbkdf2 {
        iter: u32,
    },
    Scrypt {
        #[serde(rename = "logN")]
        log_n: u8,
        r: u32,
        p: u32,
    },
}

pub struct KeyDerivation {
    algorithm: PasswordKdf,
}

impl KeyDerivation {
    pub fn new(algorithm: PasswordKdf) -> Self {
        Self { algorithm }
    }

    pub fn pbkdf2(iterations: u32) -> Self {
        Self::new(PasswordKdf::Pbkdf2 { iter: iterations })
    }

    pub fn scrypt(log_n: u8, r: u32, p: u32) -> Self {
        Self::new(PasswordKdf::Scrypt { log_n, r, p })
    }

    pub fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        key_length: usize,
    ) -> Result<SecretVec, KdfError> {
        debug!(key_length, "deriving key");

        match &self.algorithm {
            PasswordKdf::Pbkdf2 { iter } => self.derive_pbkdf2(password, salt, *iter, key_length),
            PasswordKdf::Scrypt { log_n, r, p } => {
                self.derive_scrypt(password, salt, *log_n, *r, *p, key_length)
            }
        }
    }

    fn derive_pbkdf2(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        key_length: usize,
    ) -> Result<SecretVec, KdfError> {
        if iterations == 0 {
            return Err(KdfError::InvalidParameters("iteration count cannot be zero".into()));
        }
        let mut key = Zeroizing::new(vec![0u8; key_length]);
        pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
        Ok(key)
    }

    fn derive_scrypt(
        &self,
        password: &[u8],
        salt: &[u8],
        log_n: u8,
        r: u32,
        p: u32,
        key_length: usize,
    ) -> Result<SecretVec, KdfError> {
        debug!(log_n, r, p, "using scrypt");

        let params = Params::new(log_n, r, p, key_length)
            .map_err(|e| KdfError::InvalidParameters(e.to_string()))?;

        let mut key = Zeroizing::new(vec![0u8; key_length]);
        scrypt::scrypt(password, salt, &params, &mut key)
            .map_err(|e| KdfError::DerivationFailed(e.to_string()))?;
        Ok(key)
    }

    pub fn generate_salt(length: usize) -> Vec<u8> {
        let mut salt = vec![0u8; length];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        salt
    }
}

/// HKDF-SHA256 extract-and-expand, used to turn random seeds into signing keys.
pub fn hkdf_sha256(
    input_key_material: &[u8],
    salt: &[u8],
    info: &[u8],
    key_length: usize,
) -> Result<SecretVec, KdfError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), input_key_material);
    let mut key = Zeroizing::new(vec![0u8; key_length]);
    hk.expand(info, &mut key).map_err(|e| KdfError::DerivationFailed(e.to_string()))?;
    Ok(key)
}
