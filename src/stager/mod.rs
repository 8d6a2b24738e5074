//! The artifact hand-off state machine.
//!
//! `Keychains → Wallet → UnsignedTx → SignedTx → Submitted`. Each stage reads
//! its input artifact, refuses up front if its output already exists, and
//! only then prompts for secrets and does the work. Outputs are written
//! with [`crate::storage::write_new`], so the refusal also holds if the
//! file appears while the stage is running.

pub mod offline;
pub mod online;

use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};

use crate::core::config::RunConfig;
use crate::core::errors::{CustodyError, CustodyResult};
use crate::prompt::Prompter;
use crate::provider::{Credentials, ProviderKind};
use crate::storage::naming;

pub use offline::{
    create_keychains, recover_passphrases, show_key, sign_transaction, split_passphrases,
    CreateKeychainsArgs, KeySelector, ShowKeyArgs, SignTransactionArgs, SplitPassphrasesArgs,
};
pub use online::{
    create_transaction, create_wallet, otp_flag, submit_transaction, CreateTransactionArgs,
    CreateWalletArgs, SubmitReport, SubmitTransactionArgs,
};

/// Output path: explicit flag if given, else the default derived from `input`.
fn output_path(
    config: &RunConfig,
    explicit: Option<&Path>,
    input: &Path,
    infix: &str,
    outfix: &str,
) -> PathBuf {
    match explicit {
        Some(path) => config.resolve(path),
        None => config.resolve(naming::out_file(input, infix, outfix)),
    }
}

fn is_otp(value: &str) -> bool {
    (6..=8).contains(&value.len()) && value.chars().all(|c| c.is_ascii_digit())
}

fn is_access_token(value: &str) -> bool {
    (value.len() == 40 || value.len() == 64) && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn one_time_code(
    otp: Option<&SecretString>,
    prompter: &mut dyn Prompter,
) -> CustodyResult<SecretString> {
    let otp = match otp {
        Some(otp) => otp.clone(),
        None => prompter.secret("OTP")?,
    };
    if !is_otp(otp.expose_secret()) {
        return Err(CustodyError::ValidationError("one-time password must be 6 to 8 digits".into()));
    }
    Ok(otp)
}

/// Like [`one_time_code`], but an empty answer means no code.
fn optional_one_time_code(
    otp: Option<&SecretString>,
    prompter: &mut dyn Prompter,
) -> CustodyResult<Option<SecretString>> {
    if otp.is_none() {
        let answer = prompter.secret("OTP (empty to skip)")?;
        if answer.expose_secret().is_empty() {
            return Ok(None);
        }
        return one_time_code(Some(&answer), prompter).map(Some);
    }
    one_time_code(otp, prompter).map(Some)
}

/// Prompt for the credentials of one online stage.
///
/// With a username the account password and a one-time code are required;
/// otherwise an access token is. Providers that forward a one-time code on
/// every request are asked for one, but may go without.
fn collect_credentials(
    provider: ProviderKind,
    username: Option<&str>,
    otp: Option<&SecretString>,
    prompter: &mut dyn Prompter,
) -> CustodyResult<Credentials> {
    if let Some(username) = username.filter(|u| !u.is_empty()) {
        let password = prompter.secret(&format!("{} password", username))?;
        if password.expose_secret().is_empty() {
            return Err(CustodyError::ValidationError("missing credentials".into()));
        }
        let otp = one_time_code(otp, prompter)?;
        return Ok(Credentials::Password { username: username.to_string(), password, otp });
    }

    let access_token = prompter.secret("Application access-token")?;
    if !is_access_token(access_token.expose_secret()) {
        return Err(CustodyError::ValidationError("missing credentials".into()));
    }
    let otp = match provider {
        ProviderKind::Uphold => optional_one_time_code(otp, prompter)?,
        ProviderKind::Bitgo => otp.cloned(),
    };
    Ok(Credentials::Token { access_token, otp })
}
