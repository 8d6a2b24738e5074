//! Cosigning multisig provider (2-of-3 P2SH wallets).

pub mod offline;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::core::artifacts::{
    BitGoUnsignedTx, KeychainArtifact, Recipient, SubmissionResult, SubmitRequest,
    UnsignedTransaction, Unspent, WalletArtifact, WalletIdentity, WalletKeychainRef,
};
use crate::core::config::BitGoConfig;
use crate::core::errors::{CustodyError, CustodyResult};
use crate::provider::http::ProviderClient;
use crate::provider::{Credentials, ProviderAdapter, ProviderKind, Session, WalletOptions};
use crate::security::redaction::short_id;

pub struct BitGoAdapter {
    client: ProviderClient,
    config: BitGoConfig,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct KeychainResponse {
    xpub: String,
}

#[derive(Debug, Deserialize)]
struct WalletResponse {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    private: Option<WalletPrivate>,
}

#[derive(Debug, Deserialize)]
struct WalletPrivate {
    #[serde(default)]
    keychains: Vec<WalletKeychainRef>,
}

#[derive(Debug, Deserialize)]
struct BuildResponse {
    #[serde(rename = "transactionHex")]
    transaction_hex: String,
    unspents: Vec<Unspent>,
    #[serde(default)]
    fee: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "transactionHash", alias = "hash")]
    transaction_hash: Option<String>,
    #[serde(default)]
    transaction: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl BitGoAdapter {
    pub fn new(client: ProviderClient, config: BitGoConfig) -> Self {
        Self { client, config }
    }

    async fn add_keychain(&self, session: &Session, body: Value) -> CustodyResult<()> {
        let _: Value = self.client.post_json("/api/v1/keychain", Some(&session.access_token), &body).await?;
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for BitGoAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bitgo
    }

    async fn authenticate(&self, credentials: &Credentials) -> CustodyResult<Session> {
        match credentials {
            Credentials::Password { username, password, otp } => {
                let body = json!({
                    "email": username,
                    "password": password.expose_secret(),
                    "otp": otp.expose_secret(),
                });
                let login: LoginResponse = self
                    .client
                    .post_json("/api/v1/user/login", None, &body)
                    .await?;
                let token = SecretString::new(login.access_token);

                // unlock for spending with the same one-time code
                let _: Value = self
                    .client
                    .post_json("/api/v1/user/unlock", Some(&token), &json!({ "otp": otp.expose_secret() }))
                    .await?;
                info!(user = %username, "authenticated with password");
                Ok(Session { access_token: token, otp: Some(otp.clone()) })
            }
            Credentials::Token { access_token, otp } => {
                let _: Value = self.client.get("/api/v1/user/session", Some(access_token)).await?;
                info!("authenticated with access token");
                Ok(Session { access_token: access_token.clone(), otp: otp.clone() })
            }
        }
    }

    async fn create_wallet(
        &self,
        session: &Session,
        keychains: &KeychainArtifact,
        label: &str,
        options: &WalletOptions,
    ) -> CustodyResult<WalletIdentity> {
        let backup = keychains.backup_key.as_ref().ok_or_else(|| {
            CustodyError::ValidationError("keychain file missing backupKey information".into())
        })?;
        let user = &keychains.user_key;

        let encrypted = serde_json::to_string(&user.encrypted_xprv)?;
        self.add_keychain(
            session,
            json!({ "label": user.label, "xpub": user.xpub, "encryptedXprv": encrypted }),
        )
        .await?;
        self.add_keychain(session, json!({ "label": backup.label, "xpub": backup.xpub })).await?;

        let cosigner: KeychainResponse = self
            .client
            .post_json("/api/v1/keychain/bitgo", Some(&session.access_token), &json!({}))
            .await?;
        info!(xpub = %short_id(&cosigner.xpub), "provider keychain created");

        let mut body = Map::new();
        body.insert("label".into(), json!(label));
        body.insert("m".into(), json!(2));
        body.insert("n".into(), json!(3));
        body.insert(
            "keychains".into(),
            json!([{ "xpub": user.xpub }, { "xpub": backup.xpub }, { "xpub": cosigner.xpub }]),
        );
        if let Some(enterprise) = &options.enterprise_id {
            body.insert("enterprise".into(), json!(enterprise));
        }
        let wallet: WalletResponse = self
            .client
            .post_json("/api/v1/wallet", Some(&session.access_token), &Value::Object(body))
            .await?;

        info!(wallet = %wallet.id, "wallet created");
        Ok(WalletIdentity { id: wallet.id, label: wallet.label, currency: None })
    }

    async fn create_transaction(
        &self,
        session: &Session,
        wallet: &WalletArtifact,
        recipients: &[Recipient],
        _message: Option<&str>,
    ) -> CustodyResult<UnsignedTransaction> {
        let token = Some(&session.access_token);

        let path = format!("/api/v1/tx/fee?numBlocks={}", self.config.fee_blocks);
        let estimate: Value = self.client.get(&path, token).await.map_err(|e| {
            warn!(error = %e, "fee estimate unavailable");
            e
        })?;
        info!(estimate = %estimate, "estimated fees");

        let info: WalletResponse =
            self.client.get(&format!("/api/v1/wallet/{}", wallet.wallet.id), token).await?;
        let wallet_keychains = info.private.map(|p| p.keychains).unwrap_or_default();
        if wallet_keychains.is_empty() {
            return Err(CustodyError::ProviderError(format!(
                "wallet {} reported no keychains",
                wallet.wallet.id
            )));
        }

        let mut targets = Map::new();
        for recipient in recipients {
            let satoshis: u64 = recipient.base_units.parse().map_err(|_| {
                CustodyError::ValidationError(format!("amount out of range: {}", recipient.base_units))
            })?;
            targets.insert(recipient.address.clone(), json!(satoshis));
        }
        let built: BuildResponse = self
            .client
            .post_json(
                &format!("/api/v1/wallet/{}/tx/build", wallet.wallet.id),
                token,
                &json!({ "recipients": targets, "feeTxConfirmTarget": 1 }),
            )
            .await?;

        info!(fee = ?built.fee, inputs = built.unspents.len(), "actual fee");
        Ok(UnsignedTransaction::BitGo(BitGoUnsignedTx {
            transaction_hex: built.transaction_hex,
            unspents: built.unspents,
            fee: built.fee,
            wallet_id: info.id,
            wallet_keychains,
            authenticate: wallet.authenticate.clone(),
        }))
    }

    async fn submit_transaction(
        &self,
        session: &Session,
        request: &SubmitRequest,
        message: &str,
    ) -> CustodyResult<SubmissionResult> {
        let SubmitRequest::BitGo(signed) = request else {
            return Err(CustodyError::ValidationError(
                "signedTx file is not a multisig transaction".into(),
            ));
        };

        let sent: SendResponse = self
            .client
            .post_json(
                "/api/v1/tx/send",
                Some(&session.access_token),
                &json!({ "tx": signed.tx, "message": message }),
            )
            .await?;

        info!(wallet = %signed.wallet_id, hash = ?sent.transaction_hash, "transaction submitted");
        Ok(SubmissionResult {
            status: sent.status,
            message: Some(message.to_string()),
            hash: sent.transaction_hash,
            wallet_id: Some(signed.wallet_id.clone()),
            tx: Some(sent.transaction.unwrap_or_else(|| signed.tx.clone())),
            ..Default::default()
        })
    }
}
