//! Artifact DTOs exchanged between the offline and the online machine.
//!
//! One struct per artifact kind. None of them has a field able to hold
//! plaintext private material; private halves only ever appear as a
//! [`CipherBlob`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::core::config::Environment;
use crate::core::errors::{CustodyError, CustodyResult};
use crate::provider::ProviderKind;
use crate::security::CipherBlob;

/// Prefix of the per-index share fields in recovery artifacts.
pub const SHARE_FIELD_PREFIX: &str = "share_";

/// `{ env }` block echoed into artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub env: Environment,
}

/// Identity echoed through the online stages. Never holds a secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// An HTTP request signed offline and replayed verbatim online.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSignedRequest {
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub octets: String,
}

/// `{ requestType, signedTx }` envelope produced by the account provider's signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPayload {
    #[serde(rename = "requestType")]
    pub request_type: String,
    #[serde(rename = "signedTx")]
    pub signed_tx: HttpSignedRequest,
}

impl SignedPayload {
    /// Label carried in a registration body, used to match keychains to transactions.
    pub fn body_label(&self) -> Option<&str> {
        self.signed_tx.body.get("label").and_then(Value::as_str)
    }
}

/// One key: public identifier plus passphrase-encrypted private material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keychain {
    pub label: String,
    pub xpub: String,
    #[serde(rename = "encryptedXprv")]
    pub encrypted_xprv: CipherBlob,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<SignedPayload>,
}

/// Canonical keychain artifact (`keychains-<label>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeychainArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ArtifactConfig>,
    #[serde(rename = "userKey")]
    pub user_key: Keychain,
    #[serde(rename = "backupKey", default, skip_serializing_if = "Option::is_none")]
    pub backup_key: Option<Keychain>,
}

impl KeychainArtifact {
    /// `(secret group, keychain)` pairs in a stable order.
    pub fn keys(&self) -> Vec<(&'static str, &Keychain)> {
        let mut keys = vec![("userKey", &self.user_key)];
        if let Some(backup) = &self.backup_key {
            keys.push(("backupKey", backup));
        }
        keys
    }
}

/// A keychain record carrying the `share_<i>` field(s) of one recovery index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryKeyRecord {
    #[serde(flatten)]
    pub keychain: Keychain,
    #[serde(flatten)]
    pub shares: BTreeMap<String, Value>,
}

impl RecoveryKeyRecord {
    pub fn new(keychain: Keychain, index: u8, share_hex: String) -> Self {
        let mut shares = BTreeMap::new();
        shares.insert(share_field(index), Value::String(share_hex));
        Self { keychain, shares }
    }
}

/// `recovery_<i>_<M>_<N>-<label>.json` written next to the keychain artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ArtifactConfig>,
    #[serde(rename = "userKey")]
    pub user_key: RecoveryKeyRecord,
    #[serde(rename = "backupKey", default, skip_serializing_if = "Option::is_none")]
    pub backup_key: Option<RecoveryKeyRecord>,
}

/// Recovery artifact for an arbitrary secret file: `{ secrets: { share_<i> } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsRecoveryArtifact {
    pub secrets: BTreeMap<String, String>,
}

pub fn share_field(index: u8) -> String {
    format!("{}{}", SHARE_FIELD_PREFIX, index)
}

/// Wallet reference as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Wallet artifact (`wallet-<label>.json`): a capability reference only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ArtifactConfig>,
    pub label: String,
    pub authenticate: Authenticate,
    pub wallet: WalletIdentity,
}

/// Amount field in a payments file; string or JSON number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountValue {
    Text(String),
    Number(serde_json::Number),
}

impl AmountValue {
    pub fn as_string(&self) -> String {
        match self {
            AmountValue::Text(s) => s.trim().to_string(),
            AmountValue::Number(n) => n.to_string(),
        }
    }
}

/// One entry of a payments file. Unknown fields are kept so batch results
/// can be merged back onto the original entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probi: Option<AmountValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satoshis: Option<AmountValue>,
    #[serde(rename = "transactionId", default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Destination and amount in the provider's base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub base_units: String,
}

/// Turn a payments list into recipients, rejecting malformed entries.
pub fn recipients_from_payments(payments: &[Payment]) -> CustodyResult<Vec<Recipient>> {
    if payments.is_empty() {
        return Err(CustodyError::ValidationError("payments file contains no payments".into()));
    }

    let mut recipients: Vec<Recipient> = Vec::with_capacity(payments.len());
    for payment in payments {
        let amount = payment
            .probi
            .as_ref()
            .or(payment.satoshis.as_ref())
            .map(AmountValue::as_string)
            .ok_or_else(|| {
                CustodyError::ValidationError(format!("payment to {} has no amount", payment.address))
            })?;
        if amount.is_empty() || !amount.chars().all(|c| c.is_ascii_digit()) {
            return Err(CustodyError::ValidationError(format!(
                "payment to {} has invalid amount {}",
                payment.address, amount
            )));
        }
        if recipients.iter().any(|r| r.address == payment.address) {
            return Err(CustodyError::ValidationError(format!(
                "duplicate payment address {}",
                payment.address
            )));
        }
        recipients.push(Recipient { address: payment.address.clone(), base_units: amount });
    }
    Ok(recipients)
}

// ---- multisig provider forms ----

/// Input being spent, as described by the cosigning provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unspent {
    #[serde(rename = "chainPath")]
    pub chain_path: String,
    #[serde(rename = "redeemScript")]
    pub redeem_script: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletKeychainRef {
    pub xpub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitGoUnsignedTx {
    #[serde(rename = "transactionHex")]
    pub transaction_hex: String,
    pub unspents: Vec<Unspent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    #[serde(rename = "walletId")]
    pub wallet_id: String,
    #[serde(rename = "walletKeychains")]
    pub wallet_keychains: Vec<WalletKeychainRef>,
    #[serde(default)]
    pub authenticate: Authenticate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitGoSignedTx {
    pub tx: String,
    #[serde(rename = "walletId")]
    pub wallet_id: String,
    #[serde(default)]
    pub authenticate: Authenticate,
}

// ---- account provider forms ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denomination {
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpholdUnsignedTx {
    pub denomination: Denomination,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpholdUnsignedBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ArtifactConfig>,
    #[serde(rename = "unsignedTxs")]
    pub unsigned_txs: Vec<UpholdUnsignedTx>,
    #[serde(default)]
    pub authenticate: Authenticate,
}

impl UpholdUnsignedBatch {
    /// Representative transaction; every entry must share its card id and label.
    pub fn head(&self) -> CustodyResult<&UpholdUnsignedTx> {
        let head = self.unsigned_txs.first().ok_or_else(|| {
            CustodyError::ValidationError("unsignedTx file doesn't contain any transactions".into())
        })?;
        for tx in &self.unsigned_txs {
            if tx.denomination.amount.is_empty()
                || tx.denomination.currency.is_empty()
                || tx.destination.is_empty()
                || tx.id.is_empty()
                || tx.label.is_empty()
            {
                return Err(CustodyError::ValidationError(
                    "unsignedTx file missing transaction information".into(),
                ));
            }
            if tx.id != head.id || tx.label != head.label {
                return Err(CustodyError::ValidationError(
                    "unsignedTx file contains inconsistent transaction information".into(),
                ));
            }
        }
        Ok(head)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpholdSignedTx {
    pub id: String,
    #[serde(flatten)]
    pub payload: SignedPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpholdSignedBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ArtifactConfig>,
    #[serde(rename = "signedTxs")]
    pub signed_txs: Vec<UpholdSignedTx>,
    #[serde(default)]
    pub authenticate: Authenticate,
}

// ---- provider-independent views ----

/// Unsigned-transaction artifact of either provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UnsignedTransaction {
    BitGo(BitGoUnsignedTx),
    Uphold(UpholdUnsignedBatch),
}

impl UnsignedTransaction {
    /// Parse and validate an unsigned-transaction artifact for `kind`.
    pub fn from_value(kind: ProviderKind, value: Value) -> CustodyResult<Self> {
        let missing =
            |e: serde_json::Error| CustodyError::ValidationError(format!("unsignedTx file missing transaction information: {}", e));
        match kind {
            ProviderKind::Bitgo => {
                let tx: BitGoUnsignedTx = serde_json::from_value(value).map_err(missing)?;
                if tx.transaction_hex.is_empty() || tx.wallet_id.is_empty() {
                    return Err(CustodyError::ValidationError(
                        "unsignedTx file missing transaction information".into(),
                    ));
                }
                Ok(UnsignedTransaction::BitGo(tx))
            }
            ProviderKind::Uphold => {
                let batch: UpholdUnsignedBatch = serde_json::from_value(value).map_err(missing)?;
                batch.head()?;
                Ok(UnsignedTransaction::Uphold(batch))
            }
        }
    }

    pub fn authenticate(&self) -> &Authenticate {
        match self {
            UnsignedTransaction::BitGo(tx) => &tx.authenticate,
            UnsignedTransaction::Uphold(batch) => &batch.authenticate,
        }
    }

    pub fn set_authenticate(&mut self, authenticate: Authenticate) {
        match self {
            UnsignedTransaction::BitGo(tx) => tx.authenticate = authenticate,
            UnsignedTransaction::Uphold(batch) => batch.authenticate = authenticate,
        }
    }

    /// Whether `keychains` holds the key this transaction must be signed with.
    ///
    /// Multisig transactions match on the user xpub being one of the wallet's
    /// keychains; account transactions match on the registration label.
    pub fn matches(&self, keychains: &KeychainArtifact) -> bool {
        match self {
            UnsignedTransaction::BitGo(tx) => tx
                .wallet_keychains
                .iter()
                .any(|entry| entry.xpub == keychains.user_key.xpub),
            UnsignedTransaction::Uphold(batch) => {
                let label = keychains.user_key.payload.as_ref().and_then(SignedPayload::body_label);
                match (batch.unsigned_txs.first(), label) {
                    (Some(head), Some(label)) => head.label == label,
                    _ => false,
                }
            }
        }
    }
}

/// Signed-transaction artifact of either provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignedTransaction {
    BitGo(BitGoSignedTx),
    Uphold(UpholdSignedBatch),
}

impl SignedTransaction {
    pub fn from_value(kind: ProviderKind, value: Value) -> CustodyResult<Self> {
        let invalid = |e: serde_json::Error| {
            CustodyError::ValidationError(format!("signedTx file missing transaction information: {}", e))
        };
        match kind {
            ProviderKind::Bitgo => {
                let tx: BitGoSignedTx = serde_json::from_value(value).map_err(invalid)?;
                if tx.wallet_id.is_empty() {
                    return Err(CustodyError::ValidationError(
                        "signedTx file missing wallet identity information".into(),
                    ));
                }
                Ok(SignedTransaction::BitGo(tx))
            }
            ProviderKind::Uphold => {
                let batch: UpholdSignedBatch = serde_json::from_value(value).map_err(invalid)?;
                if batch.signed_txs.is_empty() {
                    return Err(CustodyError::ValidationError(
                        "signedTx file doesn't contain any transactions".into(),
                    ));
                }
                if batch
                    .signed_txs
                    .iter()
                    .any(|tx| tx.id.is_empty() || tx.payload.request_type.is_empty())
                {
                    return Err(CustodyError::ValidationError(
                        "signedTx file missing transaction information".into(),
                    ));
                }
                Ok(SignedTransaction::Uphold(batch))
            }
        }
    }

    pub fn authenticate(&self) -> &Authenticate {
        match self {
            SignedTransaction::BitGo(tx) => &tx.authenticate,
            SignedTransaction::Uphold(batch) => &batch.authenticate,
        }
    }

    /// Individually submittable requests, in file order.
    pub fn requests(&self) -> Vec<SubmitRequest> {
        match self {
            SignedTransaction::BitGo(tx) => vec![SubmitRequest::BitGo(tx.clone())],
            SignedTransaction::Uphold(batch) => {
                batch.signed_txs.iter().cloned().map(SubmitRequest::Uphold).collect()
            }
        }
    }

    /// Batched artifacts get one result file per item plus an aggregate.
    pub fn is_batch(&self) -> bool {
        matches!(self, SignedTransaction::Uphold(_))
    }
}

/// One request handed to `submit_transaction`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitRequest {
    BitGo(BitGoSignedTx),
    Uphold(UpholdSignedTx),
}

/// Provider acknowledgement of a submitted transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(rename = "walletId", default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<Value>,
}

/// Merge a payment entry with its submission result for the batch aggregate.
pub fn merge_payment_result(payment: Option<&Payment>, result: &SubmissionResult) -> CustodyResult<Value> {
    let mut merged = match payment {
        Some(payment) => match serde_json::to_value(payment)? {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        None => Map::new(),
    };
    if let Value::Object(fields) = serde_json::to_value(result)? {
        merged.extend(fields);
    }
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::PasswordKdf;
    use crate::security::KeyCustodian;
    use secrecy::SecretString;
    use serde_json::json;

    fn keychain(xpub: &str) -> Keychain {
        let blob = KeyCustodian::new(PasswordKdf::Pbkdf2 { iter: 1_000 })
            .encrypt(&SecretString::new("pass".into()), b"private")
            .unwrap();
        Keychain { label: "user".into(), xpub: xpub.into(), encrypted_xprv: blob, payload: None }
    }

    #[test]
    fn test_keychain_artifact_field_names() {
        let artifact = KeychainArtifact {
            label: Some("treasury".into()),
            config: Some(ArtifactConfig { env: Environment::Test }),
            user_key: keychain("xpub-user"),
            backup_key: None,
        };
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["config"], json!({ "env": "test" }));
        assert_eq!(value["userKey"]["xpub"], "xpub-user");
        assert_eq!(value["userKey"]["encryptedXprv"]["cipher"], "aes-256-gcm");
        assert!(value.get("backupKey").is_none());
        assert!(value["userKey"].get("payload").is_none());
    }

    #[test]
    fn test_recovery_record_roundtrip_keeps_share_fields() {
        let record = RecoveryKeyRecord::new(keychain("xpub-user"), 2, "0202aa".into());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["share_2"], "0202aa");
        assert_eq!(value["xpub"], "xpub-user");

        let back: RecoveryKeyRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.keychain.xpub, "xpub-user");
        assert!(back.shares.contains_key("share_2"));
    }

    #[test]
    fn test_recipients_from_payments() {
        let payments: Vec<Payment> = serde_json::from_value(json!([
            { "address": "a1", "probi": "1500000000000000000", "transactionId": "t-1", "publisher": "x" },
            { "address": "a2", "satoshis": 1200 }
        ]))
        .unwrap();
        assert_eq!(payments[0].extra["publisher"], "x");

        let recipients = recipients_from_payments(&payments).unwrap();
        assert_eq!(recipients[0].base_units, "1500000000000000000");
        assert_eq!(recipients[1].base_units, "1200");
    }

    #[test]
    fn test_recipients_reject_bad_entries() {
        let no_amount: Vec<Payment> = serde_json::from_value(json!([{ "address": "a1" }])).unwrap();
        assert!(recipients_from_payments(&no_amount).is_err());

        let negative: Vec<Payment> =
            serde_json::from_value(json!([{ "address": "a1", "satoshis": "-5" }])).unwrap();
        assert!(recipients_from_payments(&negative).is_err());

        let dup: Vec<Payment> = serde_json::from_value(json!([
            { "address": "a1", "satoshis": 1 },
            { "address": "a1", "satoshis": 2 }
        ]))
        .unwrap();
        assert!(recipients_from_payments(&dup).is_err());
        assert!(recipients_from_payments(&[]).is_err());
    }

    #[test]
    fn test_unsigned_uphold_validation() {
        let good = json!({
            "unsignedTxs": [
                { "denomination": { "amount": "1", "currency": "BAT" }, "destination": "d1", "id": "card", "label": "l" },
                { "denomination": { "amount": "2", "currency": "BAT" }, "destination": "d2", "id": "card", "label": "l" }
            ],
            "authenticate": {}
        });
        assert!(UnsignedTransaction::from_value(ProviderKind::Uphold, good).is_ok());

        let inconsistent = json!({
            "unsignedTxs": [
                { "denomination": { "amount": "1", "currency": "BAT" }, "destination": "d1", "id": "card", "label": "l" },
                { "denomination": { "amount": "2", "currency": "BAT" }, "destination": "d2", "id": "other", "label": "l" }
            ]
        });
        assert!(matches!(
            UnsignedTransaction::from_value(ProviderKind::Uphold, inconsistent),
            Err(CustodyError::ValidationError(_))
        ));

        let empty = json!({ "unsignedTxs": [] });
        assert!(UnsignedTransaction::from_value(ProviderKind::Uphold, empty).is_err());
    }

    #[test]
    fn test_unsigned_bitgo_requires_fields() {
        let missing = json!({ "transactionHex": "00", "walletId": "w" });
        assert!(matches!(
            UnsignedTransaction::from_value(ProviderKind::Bitgo, missing),
            Err(CustodyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_multisig_match_uses_wallet_keychains() {
        let unsigned = json!({
            "transactionHex": "00",
            "unspents": [],
            "walletId": "w",
            "walletKeychains": [{ "xpub": "xpub-cosigner" }, { "xpub": "xpub-user" }]
        });
        let unsigned = UnsignedTransaction::from_value(ProviderKind::Bitgo, unsigned).unwrap();

        let mut artifact = KeychainArtifact {
            label: Some("vault".into()),
            config: None,
            user_key: keychain("xpub-user"),
            backup_key: Some(keychain("xpub-cosigner")),
        };
        assert!(unsigned.matches(&artifact));

        // only the user key counts, even if the backup key is listed
        artifact.user_key = keychain("xpub-stranger");
        assert!(!unsigned.matches(&artifact));
    }

    #[test]
    fn test_merge_payment_result() {
        let payment: Payment =
            serde_json::from_value(json!({ "address": "a1", "probi": "10", "publisher": "p" })).unwrap();
        let result = SubmissionResult {
            status: Some("completed".into()),
            hash: Some("h1".into()),
            ..Default::default()
        };
        let merged = merge_payment_result(Some(&payment), &result).unwrap();
        assert_eq!(merged["publisher"], "p");
        assert_eq!(merged["hash"], "h1");
        assert_eq!(merged["address"], "a1");
    }
}
