//! Account-based custodial provider (cards funded from one account).

pub mod http_signature;
pub mod offline;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use crate::core::artifacts::{
    Authenticate, Denomination, HttpSignedRequest, KeychainArtifact, Recipient, SubmissionResult,
    SubmitRequest, UnsignedTransaction, UpholdUnsignedBatch, UpholdUnsignedTx, WalletArtifact,
    WalletIdentity,
};
use crate::core::errors::{CustodyError, CustodyResult};
use crate::provider::http::ProviderClient;
use crate::provider::{Credentials, ProviderAdapter, ProviderKind, Session, WalletOptions};

/// Base units (`probi`) per whole token.
pub const PROBI_SCALE: u32 = 18;

pub struct UpholdAdapter {
    client: ProviderClient,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct CardResponse {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Origin {
    #[serde(rename = "CardId", default)]
    card_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Destination {
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default)]
    commission: Option<Value>,
    #[serde(default)]
    fee: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    origin: Origin,
    #[serde(default)]
    destination: Destination,
}

/// Convert an integer amount of `probi` into a normalized decimal string.
pub fn probi_to_amount(probi: &str) -> CustodyResult<String> {
    let value: i128 = probi
        .trim()
        .parse()
        .map_err(|_| CustodyError::ValidationError(format!("invalid probi amount: {}", probi)))?;
    let amount = Decimal::try_from_i128_with_scale(value, PROBI_SCALE)
        .map_err(|e| CustodyError::ValidationError(format!("probi amount {}: {}", probi, e)))?;
    Ok(amount.normalize().to_string())
}

impl UpholdAdapter {
    pub fn new(client: ProviderClient, currency: String) -> Self {
        Self { client, currency }
    }

    fn signed_headers(request: &HttpSignedRequest, session: &Session) -> BTreeMap<String, String> {
        let mut headers = request.headers.clone();
        if let Some(otp) = &session.otp {
            headers.insert("otp-token".to_string(), otp.expose_secret().clone());
        }
        headers
    }
}

#[async_trait]
impl ProviderAdapter for UpholdAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Uphold
    }

    async fn authenticate(&self, credentials: &Credentials) -> CustodyResult<Session> {
        match credentials {
            Credentials::Token { access_token, otp } => {
                let _: Value = self.client.get("/v0/me", Some(access_token)).await?;
                info!("authenticated with access token");
                Ok(Session { access_token: access_token.clone(), otp: otp.clone() })
            }
            Credentials::Password { .. } => Err(CustodyError::AuthFailed(
                "account provider requires an access token".into(),
            )),
        }
    }

    async fn create_wallet(
        &self,
        session: &Session,
        keychains: &KeychainArtifact,
        label: &str,
        _options: &WalletOptions,
    ) -> CustodyResult<WalletIdentity> {
        let payload = keychains.user_key.payload.as_ref().ok_or_else(|| {
            CustodyError::ValidationError("keychain file missing registration payload".into())
        })?;
        let request = &payload.signed_tx;

        let card: CardResponse = self
            .client
            .post_signed(
                "/v0/me/cards",
                Some(&session.access_token),
                &Self::signed_headers(request, session),
                &request.octets,
            )
            .await?;

        info!(card = %card.id, label, "card created");
        Ok(WalletIdentity {
            id: card.id,
            label: card.label.or_else(|| Some(label.to_string())),
            currency: card
                .currency
                .or_else(|| request.body.get("currency").and_then(Value::as_str).map(str::to_string)),
        })
    }

    async fn create_transaction(
        &self,
        _session: &Session,
        wallet: &WalletArtifact,
        recipients: &[Recipient],
        message: Option<&str>,
    ) -> CustodyResult<UnsignedTransaction> {
        let currency = wallet.wallet.currency.clone().unwrap_or_else(|| self.currency.clone());

        let unsigned_txs = recipients
            .iter()
            .map(|recipient| {
                Ok(UpholdUnsignedTx {
                    denomination: Denomination {
                        amount: probi_to_amount(&recipient.base_units)?,
                        currency: currency.clone(),
                    },
                    destination: recipient.address.clone(),
                    message: message.map(str::to_string),
                    id: wallet.wallet.id.clone(),
                    label: wallet.label.clone(),
                })
            })
            .collect::<CustodyResult<Vec<_>>>()?;

        info!(count = unsigned_txs.len(), card = %wallet.wallet.id, "built unsigned transfers");
        Ok(UnsignedTransaction::Uphold(UpholdUnsignedBatch {
            config: wallet.config,
            unsigned_txs,
            authenticate: Authenticate { username: wallet.authenticate.username.clone() },
        }))
    }

    async fn submit_transaction(
        &self,
        session: &Session,
        request: &SubmitRequest,
        _message: &str,
    ) -> CustodyResult<SubmissionResult> {
        let SubmitRequest::Uphold(signed) = request else {
            return Err(CustodyError::ValidationError(
                "signedTx file is not an account transfer".into(),
            ));
        };
        let http = &signed.payload.signed_tx;

        let path = format!("/v0/me/cards/{}/transactions?commit=true", signed.id);
        let result: TransactionResponse = self
            .client
            .post_signed(&path, Some(&session.access_token), &Self::signed_headers(http, session), &http.octets)
            .await?;

        info!(hash = %result.id, status = ?result.status, "transfer submitted");
        Ok(SubmissionResult {
            status: result.status,
            message: result.message,
            hash: Some(result.id),
            wallet_id: result.origin.card_id,
            tx: Some(http.octets.clone()),
            currency: result.destination.currency,
            amount: result.destination.amount,
            commission: result.destination.commission,
            fee: result.destination.fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probi_to_amount() {
        assert_eq!(probi_to_amount("1500000000000000000").unwrap(), "1.5");
        assert_eq!(probi_to_amount("1000000000000000000").unwrap(), "1");
        assert_eq!(probi_to_amount("1").unwrap(), "0.000000000000000001");
        assert_eq!(probi_to_amount("0").unwrap(), "0");
        assert!(probi_to_amount("12abc").is_err());
    }
}
