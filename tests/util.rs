// tests/util.rs
// Shared helpers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use airgap_custody::core::artifacts::{
    Authenticate, Denomination, KeychainArtifact, Recipient, SubmissionResult, SubmitRequest,
    UnsignedTransaction, UpholdUnsignedBatch, UpholdUnsignedTx, WalletArtifact, WalletIdentity,
};
use airgap_custody::core::config::{Environment, RunConfig};
use airgap_custody::crypto::kdf::PasswordKdf;
use airgap_custody::provider::{Credentials, ProviderAdapter, ProviderKind, Session, WalletOptions};
use airgap_custody::{CustodyError, CustodyResult};

pub const USER_PASS: &str = "Correct-Horse-Battery-9";
pub const BACKUP_PASS: &str = "Staple-Orbit-Lantern-4";
pub const TOKEN: &str = "0123456789abcdef0123456789abcdef01234567";
pub const OTP: &str = "123456";

/// Fast KDF so tests do not spend seconds in PBKDF2.
pub fn test_config(provider: ProviderKind, dir: &Path) -> RunConfig {
    RunConfig::new(provider, Environment::Test, dir).with_kdf(PasswordKdf::Pbkdf2 { iter: 1_000 })
}

pub fn pass(s: &str) -> SecretString {
    SecretString::new(s.to_string())
}

pub fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

/// In-memory provider. Records every submitted request and fails the
/// submission at `fail_at` (0-based) if set. With `occupy_at`, the given
/// file is created right after that submission is acknowledged.
pub struct FakeProvider {
    pub kind: ProviderKind,
    pub fail_at: Option<usize>,
    pub occupy_at: Option<(usize, PathBuf)>,
    pub submitted: Mutex<Vec<usize>>,
    calls: Mutex<usize>,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            fail_at: None,
            occupy_at: None,
            submitted: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        }
    }

    pub fn failing_at(kind: ProviderKind, offset: usize) -> Self {
        Self { fail_at: Some(offset), ..Self::new(kind) }
    }

    pub fn occupying_at(kind: ProviderKind, offset: usize, path: PathBuf) -> Self {
        Self { occupy_at: Some((offset, path)), ..Self::new(kind) }
    }

    pub fn submitted(&self) -> Vec<usize> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn authenticate(&self, credentials: &Credentials) -> CustodyResult<Session> {
        let (access_token, otp) = match credentials {
            Credentials::Password { otp, .. } => (pass("session-token"), Some(otp.clone())),
            Credentials::Token { access_token, otp } => (access_token.clone(), otp.clone()),
        };
        Ok(Session { access_token, otp })
    }

    async fn create_wallet(
        &self,
        _session: &Session,
        _keychains: &KeychainArtifact,
        label: &str,
        _options: &WalletOptions,
    ) -> CustodyResult<WalletIdentity> {
        Ok(WalletIdentity {
            id: "card-1".into(),
            label: Some(label.to_string()),
            currency: Some("BAT".into()),
        })
    }

    async fn create_transaction(
        &self,
        _session: &Session,
        wallet: &WalletArtifact,
        recipients: &[Recipient],
        message: Option<&str>,
    ) -> CustodyResult<UnsignedTransaction> {
        Ok(UnsignedTransaction::Uphold(UpholdUnsignedBatch {
            config: wallet.config,
            unsigned_txs: recipients
                .iter()
                .map(|r| UpholdUnsignedTx {
                    denomination: Denomination { amount: r.base_units.clone(), currency: "BAT".into() },
                    destination: r.address.clone(),
                    message: message.map(str::to_string),
                    id: wallet.wallet.id.clone(),
                    label: wallet.label.clone(),
                })
                .collect(),
            authenticate: Authenticate::default(),
        }))
    }

    async fn submit_transaction(
        &self,
        _session: &Session,
        request: &SubmitRequest,
        message: &str,
    ) -> CustodyResult<SubmissionResult> {
        let offset = {
            let mut calls = self.calls.lock().unwrap();
            let offset = *calls;
            *calls += 1;
            offset
        };
        if self.fail_at == Some(offset) {
            return Err(CustodyError::ProviderError(format!("item {} rejected", offset)));
        }
        self.submitted.lock().unwrap().push(offset);
        if let Some((at, path)) = &self.occupy_at {
            if *at == offset {
                std::fs::write(path, b"{}").unwrap();
            }
        }

        let wallet_id = match request {
            SubmitRequest::BitGo(tx) => tx.wallet_id.clone(),
            SubmitRequest::Uphold(tx) => tx.id.clone(),
        };
        Ok(SubmissionResult {
            status: Some("completed".into()),
            message: Some(message.to_string()),
            hash: Some(format!("hash-{}", offset)),
            wallet_id: Some(wallet_id),
            ..Default::default()
        })
    }
}
