//! Offline half of the account provider: ed25519 key generation and
//! request signing.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretString;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::core::artifacts::{Keychain, UpholdSignedBatch, UpholdSignedTx, UpholdUnsignedBatch};
use crate::core::errors::{CustodyError, CustodyResult};
use crate::crypto::kdf::hkdf_sha256;
use crate::provider::uphold::http_signature;
use crate::security::redaction::short_id;
use crate::security::KeyCustodian;

const SEED_LEN: usize = 32;

/// HKDF salt shared with the wallet clients that register signing keys.
const HKDF_SALT: [u8; 256] = [
    68, 56, 3, 221, 154, 114, 192, 52, 29, 232, 219, 131, 100, 203, 67, 162,
    37, 117, 48, 243, 112, 186, 160, 157, 222, 224, 41, 72, 38, 200, 124, 169,
    163, 102, 7, 239, 237, 85, 83, 9, 101, 54, 173, 165, 61, 168, 167, 214,
    200, 67, 128, 118, 124, 207, 215, 158, 77, 99, 198, 18, 161, 45, 156, 88,
    184, 59, 25, 243, 118, 10, 202, 210, 226, 44, 208, 189, 67, 9, 5, 235,
    75, 232, 152, 219, 189, 223, 252, 206, 15, 30, 102, 116, 167, 130, 216, 151,
    255, 68, 39, 116, 224, 15, 41, 129, 55, 203, 123, 4, 72, 131, 168, 112,
    7, 213, 154, 109, 130, 210, 39, 242, 195, 125, 239, 187, 191, 187, 15, 83,
    178, 249, 148, 139, 203, 234, 46, 135, 179, 24, 134, 169, 20, 164, 55, 121,
    62, 250, 223, 183, 37, 67, 189, 162, 77, 237, 101, 202, 100, 95, 234, 10,
    10, 137, 20, 227, 205, 215, 161, 192, 176, 12, 16, 76, 171, 38, 193, 176,
    222, 142, 107, 138, 230, 217, 237, 203, 209, 255, 46, 254, 93, 43, 161, 214,
    48, 224, 134, 144, 163, 225, 30, 68, 180, 22, 97, 3, 249, 170, 172, 145,
    237, 101, 40, 97, 7, 218, 26, 10, 37, 180, 210, 215, 241, 230, 51, 65,
    30, 7, 111, 11, 192, 40, 233, 49, 190, 89, 239, 129, 253, 65, 118, 104,
    223, 68, 249, 222, 124, 145, 106, 227, 57, 90, 168, 171, 65, 208, 1, 185,
];

fn signing_key_from_seed(seed: &[u8]) -> CustodyResult<SigningKey> {
    let derived = hkdf_sha256(seed, &HKDF_SALT, &[], SEED_LEN)
        .map_err(|e| CustodyError::SigningFailed(e.to_string()))?;
    let mut bytes = Zeroizing::new([0u8; SEED_LEN]);
    bytes.copy_from_slice(&derived);
    Ok(SigningKey::from_bytes(&bytes))
}

/// Generate the user key and its signed card-registration payload.
///
/// The registration body is signed here because the private key never
/// reaches the online machine.
pub fn create_keychain(
    custodian: &KeyCustodian,
    label: &str,
    currency: &str,
    passphrase: &SecretString,
) -> CustodyResult<Keychain> {
    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    OsRng.fill_bytes(&mut seed[..]);

    let key = signing_key_from_seed(&seed[..])?;
    let public_key = hex::encode(key.verifying_key().as_bytes());
    let secret_hex = Zeroizing::new(hex::encode(&seed[..]));
    let encrypted_xprv = custodian.encrypt(passphrase, secret_hex.as_bytes())?;

    let payload = http_signature::sign(
        &key,
        json!({ "label": label, "currency": currency, "publicKey": public_key }),
    );

    debug!(label, key = %short_id(&public_key), "generated account keychain");
    Ok(Keychain { label: "user".to_string(), xpub: public_key, encrypted_xprv, payload: Some(payload) })
}

/// Decrypt the user key and sign every transfer in the batch.
pub fn sign_transactions(
    custodian: &KeyCustodian,
    unsigned: &UpholdUnsignedBatch,
    keychain: &Keychain,
    passphrase: &SecretString,
) -> CustodyResult<UpholdSignedBatch> {
    let plain = custodian.decrypt(passphrase, &keychain.encrypted_xprv)?;
    let seed = Zeroizing::new(
        hex::decode(&plain[..])
            .map_err(|e| CustodyError::CorruptCiphertext(format!("decrypted key: {}", e)))?,
    );
    if seed.len() != SEED_LEN {
        return Err(CustodyError::CorruptCiphertext("decrypted key has wrong length".into()));
    }
    let key = signing_key_from_seed(&seed)?;
    if hex::encode(key.verifying_key().as_bytes()) != keychain.xpub {
        return Err(CustodyError::CorruptCiphertext(
            "decrypted key does not match its public key".into(),
        ));
    }

    let mut signed_txs = Vec::with_capacity(unsigned.unsigned_txs.len());
    for tx in &unsigned.unsigned_txs {
        let mut body = Map::new();
        body.insert("denomination".into(), serde_json::to_value(&tx.denomination)?);
        body.insert("destination".into(), Value::String(tx.destination.clone()));
        if let Some(message) = &tx.message {
            body.insert("message".into(), Value::String(message.clone()));
        }
        signed_txs.push(UpholdSignedTx {
            id: tx.id.clone(),
            payload: http_signature::sign(&key, Value::Object(body)),
        });
    }

    info!(count = signed_txs.len(), "signed account transfers");
    Ok(UpholdSignedBatch {
        config: unsigned.config,
        signed_txs,
        authenticate: unsigned.authenticate.clone(),
    })
}
