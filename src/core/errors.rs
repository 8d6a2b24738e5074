use std::path::PathBuf;

use crate::security::custodian::CipherError;
use crate::shamir::ShamirError;

/// Crate-wide result alias.
pub type CustodyResult<T> = Result<T, CustodyError>;

/// Error type for every stage of the custody workflow.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// Malformed or missing required fields in an input artifact.
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// Refusal to overwrite an existing output artifact.
    #[error("file exists: {}", .0.display())]
    ArtifactExists(PathBuf),
    /// Bad credentials or one-time code.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    /// Authentication tag mismatch while decrypting key material.
    #[error("invalid passphrase")]
    InvalidPassphrase,
    /// Encrypted blob could not be parsed.
    #[error("Corrupt ciphertext: {0}")]
    CorruptCiphertext(String),
    /// Fewer distinct shares than the threshold.
    #[error("insufficient shares for {group}: need {needed}, have {have}")]
    InsufficientShares { group: String, needed: u8, have: usize },
    /// Share set decoded to something that is not a framed secret.
    #[error("Corrupt share: {0}")]
    CorruptShare(String),
    /// None of the candidate keychains belongs to the transaction.
    #[error("no keychain matches the transaction")]
    NoMatchingKeychain,
    /// Opaque upstream failure, reported verbatim.
    #[error("Provider error: {0}")]
    ProviderError(String),
    /// Key generation or signing failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    /// Configuration errors.
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Interactive prompt failed or was aborted.
    #[error("Prompt error: {0}")]
    PromptError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CustodyError {
    /// Errors that indicate key material may be at risk or unusable.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            CustodyError::InvalidPassphrase
                | CustodyError::CorruptCiphertext(_)
                | CustodyError::CorruptShare(_)
        )
    }
}

impl From<serde_json::Error> for CustodyError {
    fn from(err: serde_json::Error) -> Self {
        CustodyError::ValidationError(err.to_string())
    }
}

impl From<CipherError> for CustodyError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::InvalidPassphrase => CustodyError::InvalidPassphrase,
            CipherError::Corrupt(msg) => CustodyError::CorruptCiphertext(msg),
            CipherError::InvalidParameters(msg) => CustodyError::ValidationError(msg),
        }
    }
}

impl From<ShamirError> for CustodyError {
    fn from(err: ShamirError) -> Self {
        match err {
            ShamirError::InsufficientShares { needed, have } => {
                CustodyError::InsufficientShares { group: "secret".to_string(), needed, have }
            }
            ShamirError::CorruptShare(msg) => CustodyError::CorruptShare(msg),
            ShamirError::InvalidParameters(msg) => CustodyError::ValidationError(msg),
        }
    }
}

impl From<reqwest::Error> for CustodyError {
    fn from(err: reqwest::Error) -> Self {
        CustodyError::ProviderError(err.to_string())
    }
}
