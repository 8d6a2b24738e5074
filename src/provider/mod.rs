//! Wallet provider adapters.
//!
//! A provider is selected once at startup ([`ProviderKind`]) and used through
//! the [`ProviderAdapter`] trait for every online stage. Offline key
//! generation and signing live next to each adapter in its `offline` module.

pub mod bitgo;
pub mod http;
pub mod uphold;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::artifacts::{
    KeychainArtifact, Recipient, SubmissionResult, SubmitRequest, UnsignedTransaction,
    WalletArtifact, WalletIdentity,
};
use crate::core::config::RunConfig;
use crate::core::errors::{CustodyError, CustodyResult};

/// Supported wallet providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Cosigning 2-of-3 multisig provider
    Bitgo,
    /// Account-based custodial provider
    Uphold,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Bitgo => "bitgo",
            ProviderKind::Uphold => "uphold",
        }
    }

    /// Multisig providers produce a backup key and need a second passphrase.
    pub fn is_multisig(&self) -> bool {
        matches!(self, ProviderKind::Bitgo)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bitgo" => Ok(ProviderKind::Bitgo),
            "uphold" => Ok(ProviderKind::Uphold),
            other => Err(CustodyError::ConfigError(format!("invalid provider: {}", other))),
        }
    }
}

/// Credentials collected interactively for one online stage.
pub enum Credentials {
    /// Account password plus one-time code.
    Password { username: String, password: SecretString, otp: SecretString },
    /// Pre-issued bearer token; some providers also want a one-time code.
    Token { access_token: SecretString, otp: Option<SecretString> },
}

impl Credentials {
    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::Password { username, .. } => Some(username),
            Credentials::Token { .. } => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => {
                f.debug_struct("Password").field("username", username).finish_non_exhaustive()
            }
            Credentials::Token { .. } => f.debug_struct("Token").finish_non_exhaustive(),
        }
    }
}

/// Authenticated session handle. Lives only in memory.
pub struct Session {
    pub access_token: SecretString,
    pub otp: Option<SecretString>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("otp", &self.otp.is_some()).finish_non_exhaustive()
    }
}

/// Extra wallet-creation parameters some providers accept.
#[derive(Debug, Clone, Default)]
pub struct WalletOptions {
    pub enterprise_id: Option<String>,
}

/// Online capabilities of a wallet provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Exchange credentials for a session. Bad credentials map to `AuthFailed`.
    async fn authenticate(&self, credentials: &Credentials) -> CustodyResult<Session>;

    /// Register the public halves of `keychains` and create a wallet under `label`.
    async fn create_wallet(
        &self,
        session: &Session,
        keychains: &KeychainArtifact,
        label: &str,
        options: &WalletOptions,
    ) -> CustodyResult<WalletIdentity>;

    /// Build an unsigned transaction paying `recipients` from `wallet`.
    async fn create_transaction(
        &self,
        session: &Session,
        wallet: &WalletArtifact,
        recipients: &[Recipient],
        message: Option<&str>,
    ) -> CustodyResult<UnsignedTransaction>;

    /// Broadcast one signed request.
    async fn submit_transaction(
        &self,
        session: &Session,
        request: &SubmitRequest,
        message: &str,
    ) -> CustodyResult<SubmissionResult>;
}

/// Build the adapter for the configured provider.
pub fn build_adapter(config: &RunConfig) -> CustodyResult<Box<dyn ProviderAdapter>> {
    let client = http::ProviderClient::new(config.base_url(), config.http_timeout_seconds)?;
    Ok(match config.provider {
        ProviderKind::Bitgo => Box::new(bitgo::BitGoAdapter::new(client, config.bitgo.clone())),
        ProviderKind::Uphold => {
            Box::new(uphold::UpholdAdapter::new(client, config.uphold.currency.clone()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("BitGo".parse::<ProviderKind>().unwrap(), ProviderKind::Bitgo);
        assert_eq!("uphold".parse::<ProviderKind>().unwrap(), ProviderKind::Uphold);
        assert!("coinbase".parse::<ProviderKind>().is_err());
        assert!(ProviderKind::Bitgo.is_multisig());
        assert!(!ProviderKind::Uphold.is_multisig());
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let creds = Credentials::Password {
            username: "ops@example.com".into(),
            password: SecretString::new("hunter2-hunter2".into()),
            otp: SecretString::new("123456".into()),
        };
        let out = format!("{:?}", creds);
        assert!(out.contains("ops@example.com"));
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("123456"));
    }
}
