// Stages run on the air-gapped machine.
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::artifacts::{Keychain, KeychainArtifact, UnsignedTransaction};
use crate::core::config::RunConfig;
use crate::core::errors::{CustodyError, CustodyResult};
use crate::keychain;
use crate::prompt::Prompter;
use crate::recovery::{self, RecoveredSecret};
use crate::security::redaction::short_id;
use crate::security::SecretVec;
use crate::storage::{self, naming};

use super::output_path;

#[derive(Debug, Clone, Default)]
pub struct CreateKeychainsArgs {
    pub label: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub keychains: Option<PathBuf>,
}

/// Generate keychains and their recovery artifacts. Returns every file written,
/// the keychain artifact first.
pub fn create_keychains(
    config: &RunConfig,
    prompter: &mut dyn Prompter,
    args: &CreateKeychainsArgs,
) -> CustodyResult<Vec<PathBuf>> {
    let label = args
        .label
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let threshold = recovery::normalize_threshold(args.min, args.max);

    let keychains_path = match &args.keychains {
        Some(path) => config.resolve(path),
        None => config.resolve(naming::keychains_file(&label)),
    };
    let recovery_paths: Vec<PathBuf> = (1..=threshold.max)
        .map(|i| config.resolve(naming::recovery_file(i, threshold.min, threshold.max, &label)))
        .collect();
    storage::ensure_absent(&keychains_path)?;
    for path in &recovery_paths {
        storage::ensure_absent(path)?;
    }

    let passphrase1 = prompter.secret("User keychain passphrase")?;
    let passphrase2 = if config.provider.is_multisig() {
        Some(prompter.secret("Backup keychain passphrase")?)
    } else {
        None
    };

    let bundle = recovery::create_with_recovery(
        config,
        &label,
        &passphrase1,
        passphrase2.as_ref(),
        threshold,
    )?;

    storage::write_new(&keychains_path, &bundle.keychains)?;
    let mut written = vec![keychains_path];
    for ((_, artifact), path) in bundle.recovery.iter().zip(recovery_paths) {
        storage::write_new(&path, artifact)?;
        written.push(path);
    }

    info!(label = %label, files = written.len(), "keychains and recovery files written");
    Ok(written)
}

#[derive(Debug, Clone, Default)]
pub struct SignTransactionArgs {
    pub unsigned_tx: PathBuf,
    pub signed_tx: Option<PathBuf>,
    pub keychains: Option<PathBuf>,
}

fn read_keychains(path: &Path) -> CustodyResult<KeychainArtifact> {
    storage::read_json(path).map_err(|e| match e {
        CustodyError::ValidationError(msg) => CustodyError::ValidationError(format!(
            "{} missing userKey information: {}",
            path.display(),
            msg
        )),
        other => other,
    })
}

/// Find the candidate keychain that belongs to `unsigned`. Candidates that do
/// not match are skipped without error.
fn matching_keychain(
    unsigned: &UnsignedTransaction,
    candidates: &[PathBuf],
) -> CustodyResult<(PathBuf, KeychainArtifact)> {
    for path in candidates {
        let keychains = read_keychains(path)?;
        if unsigned.matches(&keychains) {
            info!(file = %path.display(), xpub = %short_id(&keychains.user_key.xpub), "matched keychain");
            return Ok((path.clone(), keychains));
        }
        debug!(file = %path.display(), "keychain does not match transaction");
    }
    Err(CustodyError::NoMatchingKeychain)
}

/// Sign an unsigned-transaction artifact with the matching user key.
pub fn sign_transaction(
    config: &RunConfig,
    prompter: &mut dyn Prompter,
    args: &SignTransactionArgs,
) -> CustodyResult<PathBuf> {
    let unsigned_path = config.resolve(&args.unsigned_tx);
    let unsigned = UnsignedTransaction::from_value(config.provider, storage::read_value(&unsigned_path)?)?;

    let candidates = match &args.keychains {
        Some(path) => vec![config.resolve(path)],
        None => naming::discover_keychains(&config.work_dir)?,
    };
    if candidates.is_empty() {
        return Err(CustodyError::ValidationError("must specify --keychains".into()));
    }

    let output = output_path(
        config,
        args.signed_tx.as_deref(),
        &args.unsigned_tx,
        naming::UNSIGNED_PREFIX,
        naming::SIGNED_PREFIX,
    );
    storage::ensure_absent(&output)?;

    let (_, keychains) = matching_keychain(&unsigned, &candidates)?;
    let passphrase = prompter.secret("User keychain passphrase")?;
    let signed = keychain::sign_transaction(config, &unsigned, &keychains.user_key, &passphrase)?;

    storage::write_new(&output, &signed)?;
    Ok(output)
}

#[derive(Debug, Clone, Default)]
pub struct SplitPassphrasesArgs {
    pub secrets: PathBuf,
    pub label: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// Split an arbitrary file into standalone recovery artifacts.
pub fn split_passphrases(config: &RunConfig, args: &SplitPassphrasesArgs) -> CustodyResult<Vec<PathBuf>> {
    let secret = SecretVec::new(std::fs::read(config.resolve(&args.secrets))?);
    if secret.is_empty() {
        return Err(CustodyError::ValidationError("secrets file is empty".into()));
    }
    let label = args
        .label
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let threshold = recovery::normalize_threshold(args.min, args.max);

    let artifacts = recovery::split_secret(&secret, &label, threshold)?;
    let paths: Vec<PathBuf> = artifacts.iter().map(|(name, _)| config.resolve(name)).collect();
    for path in &paths {
        storage::ensure_absent(path)?;
    }
    for ((_, artifact), path) in artifacts.iter().zip(&paths) {
        storage::write_new(path, artifact)?;
    }
    Ok(paths)
}

/// Reconstruct the secrets whose shares appear in `files`.
pub fn recover_passphrases(config: &RunConfig, files: &[PathBuf]) -> CustodyResult<Vec<RecoveredSecret>> {
    if files.is_empty() {
        return Err(CustodyError::ValidationError("no recovery files given".into()));
    }
    let artifacts = files
        .iter()
        .map(|file| storage::read_value(&config.resolve(file)))
        .collect::<CustodyResult<Vec<Value>>>()?;
    let recovered = recovery::recover_passphrases(&artifacts);
    if recovered.is_empty() {
        warn!("no shares found in the given files");
    }
    Ok(recovered)
}

/// Which key of a keychain artifact to reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum KeySelector {
    #[default]
    User,
    Backup,
}

#[derive(Debug, Clone, Default)]
pub struct ShowKeyArgs {
    pub keychains: PathBuf,
    pub key: KeySelector,
}

/// Decrypt a private key for export after explicit confirmation.
///
/// The plaintext is returned to the caller and never written to a file.
pub fn show_key(
    config: &RunConfig,
    prompter: &mut dyn Prompter,
    args: &ShowKeyArgs,
) -> CustodyResult<SecretVec> {
    let keychains = read_keychains(&config.resolve(&args.keychains))?;
    let keychain: &Keychain = match args.key {
        KeySelector::User => &keychains.user_key,
        KeySelector::Backup => keychains.backup_key.as_ref().ok_or_else(|| {
            CustodyError::ValidationError("keychain file has no backupKey".into())
        })?,
    };

    let question = format!(
        "Reveal the private key for {} in clear text on this terminal?",
        short_id(&keychain.xpub)
    );
    if !prompter.confirm(&question)? {
        return Err(CustodyError::PromptError("aborted by operator".into()));
    }

    let passphrase: SecretString = prompter.secret("Keychain passphrase")?;
    if passphrase.expose_secret().is_empty() {
        return Err(CustodyError::InvalidPassphrase);
    }
    warn!(xpub = %short_id(&keychain.xpub), "revealing private key");
    keychain::reveal_private_key(config, keychain, &passphrase)
}
