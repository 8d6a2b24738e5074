//! Offline half of the multisig provider: BIP32 key generation and
//! signing of half-signed P2SH spends.

use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_PUSHBYTES_0 as OP_0;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Network, ScriptBuf, Transaction};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretString;
use std::str::FromStr;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::core::artifacts::{BitGoSignedTx, BitGoUnsignedTx, Keychain};
use crate::core::config::Environment;
use crate::core::errors::{CustodyError, CustodyResult};
use crate::security::redaction::short_id;
use crate::security::KeyCustodian;

const SEED_LEN: usize = 32;

pub fn network(env: Environment) -> Network {
    match env {
        Environment::Prod => Network::Bitcoin,
        Environment::Test => Network::Testnet,
    }
}

/// Generate one BIP32 master key and return it with its private half encrypted.
pub fn create_keychain(
    custodian: &KeyCustodian,
    env: Environment,
    label: &str,
    passphrase: &SecretString,
) -> CustodyResult<Keychain> {
    let secp = Secp256k1::new();
    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    OsRng.fill_bytes(&mut seed[..]);

    let xprv = Xpriv::new_master(network(env), &seed[..])
        .map_err(|e| CustodyError::SigningFailed(format!("master key: {}", e)))?;
    let xpub = Xpub::from_priv(&secp, &xprv).to_string();
    let encoded = Zeroizing::new(xprv.to_string());
    let encrypted_xprv = custodian.encrypt(passphrase, encoded.as_bytes())?;

    debug!(label, xpub = %short_id(&xpub), "generated multisig keychain");
    Ok(Keychain { label: label.to_string(), xpub, encrypted_xprv, payload: None })
}

/// Decrypt the user key and sign every input of `unsigned` with it.
pub fn sign_transaction(
    custodian: &KeyCustodian,
    unsigned: &BitGoUnsignedTx,
    keychain: &Keychain,
    passphrase: &SecretString,
) -> CustodyResult<BitGoSignedTx> {
    let plain = custodian.decrypt(passphrase, &keychain.encrypted_xprv)?;
    let encoded = std::str::from_utf8(&plain)
        .map_err(|_| CustodyError::CorruptCiphertext("decrypted key is not text".into()))?;
    let xprv = Xpriv::from_str(encoded)
        .map_err(|e| CustodyError::CorruptCiphertext(format!("decrypted key: {}", e)))?;

    let tx_bytes = hex::decode(unsigned.transaction_hex.trim())
        .map_err(|e| CustodyError::ValidationError(format!("transactionHex: {}", e)))?;
    let mut tx: Transaction = encode::deserialize(&tx_bytes)
        .map_err(|e| CustodyError::ValidationError(format!("transactionHex: {}", e)))?;

    if tx.input.len() != unsigned.unspents.len() {
        return Err(CustodyError::ValidationError(format!(
            "transaction has {} inputs but {} unspents",
            tx.input.len(),
            unsigned.unspents.len()
        )));
    }

    let secp = Secp256k1::new();
    let mut script_sigs = Vec::with_capacity(tx.input.len());
    {
        let cache = SighashCache::new(&tx);
        for (index, unspent) in unsigned.unspents.iter().enumerate() {
            let path = derivation_path(&unspent.chain_path)?;
            let child = xprv
                .derive_priv(&secp, &path)
                .map_err(|e| CustodyError::SigningFailed(format!("derive {}: {}", path, e)))?;

            let redeem = ScriptBuf::from_bytes(hex::decode(unspent.redeem_script.trim()).map_err(
                |e| CustodyError::ValidationError(format!("redeemScript: {}", e)),
            )?);
            let sighash = cache
                .legacy_signature_hash(index, &redeem, EcdsaSighashType::All.to_u32())
                .map_err(|e| CustodyError::SigningFailed(format!("sighash input {}: {}", index, e)))?;

            let msg = Message::from_digest(sighash.to_byte_array());
            let sig = secp.sign_ecdsa(&msg, &child.private_key);
            let mut sig_bytes = sig.serialize_der().to_vec();
            sig_bytes.push(EcdsaSighashType::All as u8);

            script_sigs.push(half_signed_script(sig_bytes, redeem.into_bytes())?);
        }
    }

    for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
        input.script_sig = script_sig;
    }

    info!(inputs = tx.input.len(), wallet = %unsigned.wallet_id, "signed multisig transaction");
    Ok(BitGoSignedTx {
        tx: encode::serialize_hex(&tx),
        wallet_id: unsigned.wallet_id.clone(),
        authenticate: unsigned.authenticate.clone(),
    })
}

/// `m` followed by the provider's chain path (`/0/13`).
fn derivation_path(chain_path: &str) -> CustodyResult<DerivationPath> {
    let chain_path = chain_path.trim();
    let full = if chain_path.starts_with('m') {
        chain_path.to_string()
    } else {
        format!("m{}", chain_path)
    };
    DerivationPath::from_str(&full)
        .map_err(|e| CustodyError::ValidationError(format!("chainPath {}: {}", chain_path, e)))
}

// OP_0 <user sig> OP_0 <redeem script>: the empty push is the cosigner's slot.
fn half_signed_script(sig: Vec<u8>, redeem: Vec<u8>) -> CustodyResult<ScriptBuf> {
    let sig = PushBytesBuf::try_from(sig)
        .map_err(|_| CustodyError::SigningFailed("signature too long".into()))?;
    let redeem = PushBytesBuf::try_from(redeem)
        .map_err(|_| CustodyError::ValidationError("redeemScript too long".into()))?;
    Ok(Builder::new()
        .push_opcode(OP_0)
        .push_slice(&sig)
        .push_opcode(OP_0)
        .push_slice(&redeem)
        .into_script())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifacts::{Authenticate, Unspent, WalletKeychainRef};
    use crate::crypto::kdf::PasswordKdf;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, TxIn, TxOut, Witness};

    fn custodian() -> KeyCustodian {
        KeyCustodian::new(PasswordKdf::Pbkdf2 { iter: 1_000 })
    }

    fn pass(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    fn unsigned_for(wallet_xpub: &str, inputs: usize) -> BitGoUnsignedTx {
        let tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: (0..inputs)
                .map(|i| TxIn {
                    previous_output: OutPoint { txid: Hash::all_zeros(), vout: i as u32 },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut { value: Amount::from_sat(1_000), script_pubkey: ScriptBuf::new() }],
        };
        // 2-of-3 shaped redeem script; contents are irrelevant to signing
        let redeem = format!("52{}53ae", "21".to_string() + &"02".repeat(33));
        BitGoUnsignedTx {
            transaction_hex: encode::serialize_hex(&tx),
            unspents: (0..inputs)
                .map(|i| Unspent {
                    chain_path: format!("/0/{}", i),
                    redeem_script: redeem.clone(),
                    extra: Default::default(),
                })
                .collect(),
            fee: Some(10_000),
            wallet_id: "2N-wallet".into(),
            wallet_keychains: vec![WalletKeychainRef { xpub: wallet_xpub.into(), path: Some("/0/0".into()) }],
            authenticate: Authenticate { username: Some("ops@example.com".into()) },
        }
    }

    #[test]
    fn test_keychain_never_contains_plain_xprv() {
        let keychain = create_keychain(&custodian(), Environment::Test, "user", &pass("pw")).unwrap();
        assert!(keychain.xpub.starts_with("tpub"));
        let json = serde_json::to_string(&keychain).unwrap();
        assert!(!json.contains("tprv"));
        assert!(!json.contains("xprv"));
    }

    #[test]
    fn test_sign_fills_every_input() {
        let custodian = custodian();
        let keychain = create_keychain(&custodian, Environment::Test, "user", &pass("pw")).unwrap();
        let unsigned = unsigned_for(&keychain.xpub, 2);

        let signed = sign_transaction(&custodian, &unsigned, &keychain, &pass("pw")).unwrap();
        assert_eq!(signed.wallet_id, "2N-wallet");
        assert_eq!(signed.authenticate.username.as_deref(), Some("ops@example.com"));

        let tx: Transaction = encode::deserialize(&hex::decode(&signed.tx).unwrap()).unwrap();
        for input in &tx.input {
            let bytes = input.script_sig.as_bytes();
            assert_eq!(bytes[0], 0x00);
            assert!(bytes.len() > 70);
        }
    }

    #[test]
    fn test_sign_with_wrong_passphrase() {
        let custodian = custodian();
        let keychain = create_keychain(&custodian, Environment::Test, "user", &pass("pw")).unwrap();
        let unsigned = unsigned_for(&keychain.xpub, 1);
        assert!(matches!(
            sign_transaction(&custodian, &unsigned, &keychain, &pass("nope")),
            Err(CustodyError::InvalidPassphrase)
        ));
    }

    #[test]
    fn test_input_count_mismatch_rejected() {
        let custodian = custodian();
        let keychain = create_keychain(&custodian, Environment::Test, "user", &pass("pw")).unwrap();
        let mut unsigned = unsigned_for(&keychain.xpub, 2);
        unsigned.unspents.pop();
        assert!(matches!(
            sign_transaction(&custodian, &unsigned, &keychain, &pass("pw")),
            Err(CustodyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_derivation_path() {
        assert_eq!(derivation_path("/0/5").unwrap().to_string(), "m/0/5");
        assert_eq!(derivation_path("m/1/2").unwrap().to_string(), "m/1/2");
        assert!(derivation_path("/x").is_err());
    }
}
