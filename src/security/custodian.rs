//! Passphrase encryption of private key material.
//!
//! A [`CipherBlob`] is self-describing: it records the KDF and its cost,
//! the salt and the nonce next to the ciphertext, so a keychain written
//! today decrypts regardless of later configuration changes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::kdf::{KeyDerivation, PasswordKdf};
use crate::security::SecretVec;

const BLOB_VERSION: u8 = 1;
const CIPHER_NAME: &str = "aes-256-gcm";
const KEY_BITS: u16 = 256;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("invalid passphrase")]
    InvalidPassphrase,
    #[error("corrupt ciphertext: {0}")]
    Corrupt(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Encrypted private material as stored in keychain artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherBlob {
    pub v: u8,
    pub cipher: String,
    #[serde(flatten)]
    pub kdf: PasswordKdf,
    pub ks: u16,
    pub salt: String,
    pub iv: String,
    pub ct: String,
}

/// Encrypts and decrypts key material under user passphrases.
#[derive(Debug, Clone)]
pub struct KeyCustodian {
    kdf: PasswordKdf,
}

impl KeyCustodian {
    pub fn new(kdf: PasswordKdf) -> Self {
        Self { kdf }
    }

    /// Encrypt `plaintext` with a key derived from `passphrase` and a fresh salt.
    pub fn encrypt(
        &self,
        passphrase: &SecretString,
        plaintext: &[u8],
    ) -> Result<CipherBlob, CipherError> {
        if passphrase.expose_secret().is_empty() {
            return Err(CipherError::InvalidParameters("passphrase cannot be empty".to_string()));
        }

        let salt = KeyDerivation::generate_salt(SALT_LEN);
        let key = derive(&self.kdf, passphrase, &salt)
            .map_err(|e| CipherError::InvalidParameters(e.to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CipherError::InvalidParameters("invalid key length".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        #[allow(deprecated)]
        let nonce = aes_gcm::aead::Nonce::<Aes256Gcm>::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::InvalidParameters("encryption failed".to_string()))?;

        debug!(kdf = ?self.kdf, "encrypted key material");
        Ok(CipherBlob {
            v: BLOB_VERSION,
            cipher: CIPHER_NAME.to_string(),
            kdf: self.kdf.clone(),
            ks: KEY_BITS,
            salt: B64.encode(salt),
            iv: B64.encode(nonce_bytes),
            ct: B64.encode(ciphertext),
        })
    }

    /// Decrypt a blob. Fails closed: no partial plaintext is ever returned.
    pub fn decrypt(
        &self,
        passphrase: &SecretString,
        blob: &CipherBlob,
    ) -> Result<SecretVec, CipherError> {
        if blob.v != BLOB_VERSION || blob.cipher != CIPHER_NAME || blob.ks != KEY_BITS {
            return Err(CipherError::Corrupt(format!(
                "unsupported cipher blob v{} {} ks={}",
                blob.v, blob.cipher, blob.ks
            )));
        }

        let salt = decode_field("salt", &blob.salt)?;
        let iv = decode_field("iv", &blob.iv)?;
        let ct = decode_field("ct", &blob.ct)?;
        if salt.is_empty() {
            return Err(CipherError::Corrupt("empty salt".to_string()));
        }
        if iv.len() != NONCE_LEN {
            return Err(CipherError::Corrupt(format!("iv must be {} bytes", NONCE_LEN)));
        }
        if ct.len() < TAG_LEN {
            return Err(CipherError::Corrupt("ciphertext shorter than tag".to_string()));
        }

        let key = derive(&blob.kdf, passphrase, &salt).map_err(|e| CipherError::Corrupt(e.to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CipherError::Corrupt("invalid key length".to_string()))?;
        #[allow(deprecated)]
        let nonce = aes_gcm::aead::Nonce::<Aes256Gcm>::from_slice(&iv);

        let plaintext =
            cipher.decrypt(nonce, ct.as_slice()).map_err(|_| CipherError::InvalidPassphrase)?;
        Ok(SecretVec::new(plaintext))
    }
}

fn derive(
    kdf: &PasswordKdf,
    passphrase: &SecretString,
    salt: &[u8],
) -> Result<SecretVec, crate::crypto::kdf::KdfError> {
    KeyDerivation::new(kdf.clone()).derive_key(
        passphrase.expose_secret().as_bytes(),
        salt,
        (KEY_BITS / 8) as usize,
    )
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CipherError> {
    B64.decode(value).map_err(|e| CipherError::Corrupt(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KeyCustodian {
        KeyCustodian::new(PasswordKdf::Pbkdf2 { iter: 1_000 })
    }

    fn pass(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[test]
    fn test_roundtrip() {
        let custodian = fast();
        let blob = custodian.encrypt(&pass("correct horse"), b"xprv-material").unwrap();
        let plain = custodian.decrypt(&pass("correct horse"), &blob).unwrap();
        assert_eq!(plain.as_slice(), b"xprv-material");
    }

    #[test]
    fn test_wrong_passphrase() {
        let custodian = fast();
        let blob = custodian.encrypt(&pass("correct horse"), b"xprv-material").unwrap();
        assert_eq!(
            custodian.decrypt(&pass("wrong horse"), &blob),
            Err(CipherError::InvalidPassphrase)
        );
    }

    #[test]
    fn test_same_plaintext_never_same_ciphertext() {
        let custodian = fast();
        let a = custodian.encrypt(&pass("p"), b"same").unwrap();
        let b = custodian.encrypt(&pass("p"), b"same").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.ct, b.ct);
    }

    #[test]
    fn test_blob_carries_kdf_parameters() {
        let blob = fast().encrypt(&pass("p"), b"k").unwrap();
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["kdf"], "pbkdf2");
        assert_eq!(json["iter"], 1000);
        assert_eq!(json["cipher"], "aes-256-gcm");

        // decrypting with a differently configured custodian still works
        let other = KeyCustodian::new(PasswordKdf::Scrypt { log_n: 10, r: 8, p: 1 });
        assert_eq!(other.decrypt(&pass("p"), &blob).unwrap().as_slice(), b"k");
    }

    #[test]
    fn test_scrypt_blob_roundtrip() {
        let custodian = KeyCustodian::new(PasswordKdf::Scrypt { log_n: 10, r: 8, p: 1 });
        let blob = custodian.encrypt(&pass("p"), b"k").unwrap();
        assert_eq!(custodian.decrypt(&pass("p"), &blob).unwrap().as_slice(), b"k");
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let custodian = fast();
        let mut blob = custodian.encrypt(&pass("p"), b"secret key").unwrap();
        let mut ct = B64.decode(&blob.ct).unwrap();
        ct[0] ^= 0x01;
        blob.ct = B64.encode(ct);
        assert_eq!(custodian.decrypt(&pass("p"), &blob), Err(CipherError::InvalidPassphrase));
    }

    #[test]
    fn test_malformed_blob() {
        let custodian = fast();
        let good = custodian.encrypt(&pass("p"), b"k").unwrap();

        let mut bad_b64 = good.clone();
        bad_b64.iv = "***".to_string();
        assert!(matches!(custodian.decrypt(&pass("p"), &bad_b64), Err(CipherError::Corrupt(_))));

        let mut short_iv = good.clone();
        short_iv.iv = B64.encode([0u8; 4]);
        assert!(matches!(custodian.decrypt(&pass("p"), &short_iv), Err(CipherError::Corrupt(_))));

        let mut wrong_cipher = good;
        wrong_cipher.cipher = "aes-128-ccm".to_string();
        assert!(matches!(
            custodian.decrypt(&pass("p"), &wrong_cipher),
            Err(CipherError::Corrupt(_))
        ));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(matches!(
            fast().encrypt(&pass(""), b"k"),
            Err(CipherError::InvalidParameters(_))
        ));
    }
}
