// Stages run on the networked machine.
use secrecy::SecretString;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{error, info};

use crate::core::artifacts::{
    merge_payment_result, recipients_from_payments, Authenticate, KeychainArtifact, Payment,
    SignedTransaction, WalletArtifact,
};
use crate::core::config::RunConfig;
use crate::core::errors::{CustodyError, CustodyResult};
use crate::prompt::Prompter;
use crate::provider::{ProviderAdapter, ProviderKind, WalletOptions};
use crate::storage::{self, naming};

use super::{collect_credentials, output_path};

#[derive(Debug, Default)]
pub struct CreateWalletArgs {
    pub keychains: PathBuf,
    pub wallet: Option<PathBuf>,
    pub user: Option<String>,
    pub otp: Option<SecretString>,
}

/// Register the keychains with the provider and persist the wallet reference.
pub async fn create_wallet(
    config: &RunConfig,
    provider: &dyn ProviderAdapter,
    prompter: &mut dyn Prompter,
    args: &CreateWalletArgs,
) -> CustodyResult<PathBuf> {
    let keychains_path = config.resolve(&args.keychains);
    let keychains: KeychainArtifact = storage::read_json(&keychains_path)?;
    let label = keychains
        .label
        .clone()
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| naming::label_from_keychains_file(&keychains_path));

    let output = output_path(
        config,
        args.wallet.as_deref(),
        &args.keychains,
        naming::KEYCHAINS_PREFIX,
        naming::WALLET_PREFIX,
    );
    storage::ensure_absent(&output)?;

    let mut options = WalletOptions::default();
    let username = match (provider.kind(), &args.user) {
        (_, Some(user)) => Some(user.clone()),
        (ProviderKind::Bitgo, None) => {
            Some(prompter.text("Account email-address (empty to use an access token)")?)
                .filter(|u| !u.trim().is_empty())
        }
        (ProviderKind::Uphold, None) => None,
    };
    if provider.kind() == ProviderKind::Bitgo {
        let enterprise = prompter.text("Wallet enterpriseId (optional)")?;
        let enterprise = enterprise.trim();
        if !enterprise.is_empty() {
            if enterprise.len() != 32 || !enterprise.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(CustodyError::ValidationError("invalid enterpriseId".into()));
            }
            options.enterprise_id = Some(enterprise.to_string());
        }
    }

    let credentials =
        collect_credentials(provider.kind(), username.as_deref(), args.otp.as_ref(), prompter)?;
    let session = provider.authenticate(&credentials).await?;
    let wallet = provider.create_wallet(&session, &keychains, &label, &options).await?;

    let artifact = WalletArtifact {
        config: keychains.config,
        label,
        authenticate: Authenticate { username: credentials.username().map(str::to_string) },
        wallet,
    };
    storage::write_new(&output, &artifact)?;
    Ok(output)
}

#[derive(Debug, Default)]
pub struct CreateTransactionArgs {
    pub wallet: PathBuf,
    pub payments: PathBuf,
    pub unsigned_tx: Option<PathBuf>,
    pub otp: Option<SecretString>,
}

fn read_wallet(config: &RunConfig, path: &std::path::Path) -> CustodyResult<WalletArtifact> {
    let wallet: WalletArtifact = storage::read_json(&config.resolve(path)).map_err(|e| match e {
        CustodyError::ValidationError(msg) => CustodyError::ValidationError(format!(
            "wallet file missing identity information: {}",
            msg
        )),
        other => other,
    })?;
    if wallet.wallet.id.is_empty() {
        return Err(CustodyError::ValidationError(
            "wallet file missing wallet identity information".into(),
        ));
    }
    Ok(wallet)
}

/// Build an unsigned transaction for a payments list.
pub async fn create_transaction(
    config: &RunConfig,
    provider: &dyn ProviderAdapter,
    prompter: &mut dyn Prompter,
    args: &CreateTransactionArgs,
) -> CustodyResult<PathBuf> {
    let wallet = read_wallet(config, &args.wallet)?;
    let payments: Vec<Payment> = storage::read_json(&config.resolve(&args.payments))?;
    let recipients = recipients_from_payments(&payments)?;

    let output = output_path(
        config,
        args.unsigned_tx.as_deref(),
        &args.payments,
        naming::PAYMENTS_PREFIX,
        naming::UNSIGNED_PREFIX,
    );
    storage::ensure_absent(&output)?;

    let credentials = collect_credentials(
        provider.kind(),
        wallet.authenticate.username.as_deref(),
        args.otp.as_ref(),
        prompter,
    )?;
    let session = provider.authenticate(&credentials).await?;

    let message = match provider.kind() {
        ProviderKind::Uphold => payments.first().and_then(|p| p.transaction_id.clone()),
        ProviderKind::Bitgo => None,
    };
    let mut unsigned = provider
        .create_transaction(&session, &wallet, &recipients, message.as_deref())
        .await?;
    unsigned.set_authenticate(Authenticate { username: wallet.authenticate.username.clone() });

    storage::write_new(&output, &unsigned)?;
    info!(recipients = recipients.len(), file = %output.display(), "unsigned transaction staged");
    Ok(output)
}

#[derive(Debug, Default)]
pub struct SubmitTransactionArgs {
    pub signed_tx: PathBuf,
    pub submit_tx: Option<PathBuf>,
    pub payments: Option<PathBuf>,
    pub otp: Option<SecretString>,
}

/// Files written by a submission, including after a partial batch failure.
#[derive(Debug, Default)]
pub struct SubmitReport {
    pub output: PathBuf,
    pub items: Vec<PathBuf>,
}

/// Payments list for a batch: explicit flag, else `payments-<x>.json`, else `<x>.json`.
fn batch_payments(config: &RunConfig, args: &SubmitTransactionArgs) -> CustodyResult<Vec<Payment>> {
    let path = match &args.payments {
        Some(path) => config.resolve(path),
        None => {
            let preferred = config.resolve(naming::out_file(
                &args.signed_tx,
                naming::SIGNED_PREFIX,
                naming::PAYMENTS_PREFIX,
            ));
            if preferred.exists() {
                preferred
            } else {
                config.resolve(naming::out_file(&args.signed_tx, naming::SIGNED_PREFIX, ""))
            }
        }
    };
    storage::read_json(&path)
}

/// Submit a signed artifact.
///
/// Batches are submitted one item at a time. Each acknowledgement goes to its
/// own file; the first failure stops the batch, the aggregate of what
/// succeeded is still written, and that failure is returned.
pub async fn submit_transaction(
    config: &RunConfig,
    provider: &dyn ProviderAdapter,
    prompter: &mut dyn Prompter,
    args: &SubmitTransactionArgs,
) -> CustodyResult<SubmitReport> {
    let signed = SignedTransaction::from_value(
        config.provider,
        storage::read_value(&config.resolve(&args.signed_tx))?,
    )?;
    let output = output_path(
        config,
        args.submit_tx.as_deref(),
        &args.signed_tx,
        naming::SIGNED_PREFIX,
        naming::SUBMIT_PREFIX,
    );

    let requests = signed.requests();
    let details = if signed.is_batch() { batch_payments(config, args)? } else { Vec::new() };
    let item_paths: Vec<PathBuf> = if signed.is_batch() {
        (0..requests.len())
            .map(|offset| naming::batch_item_file(&output, offset, requests.len()))
            .collect()
    } else {
        Vec::new()
    };
    storage::ensure_absent(&output)?;
    for path in &item_paths {
        storage::ensure_absent(path)?;
    }

    let credentials = collect_credentials(
        provider.kind(),
        signed.authenticate().username.as_deref(),
        args.otp.as_ref(),
        prompter,
    )?;
    let session = provider.authenticate(&credentials).await?;

    let message = naming::out_file(&output, naming::SUBMIT_PREFIX, "");
    let message = message.strip_suffix(".json").unwrap_or(&message).to_string();

    if !signed.is_batch() {
        let mut report = SubmitReport { output: output.clone(), items: Vec::new() };
        for request in &requests {
            let result = provider.submit_transaction(&session, request, &message).await?;
            storage::write_new(&output, &result)?;
            report.items.push(output.clone());
        }
        return Ok(report);
    }

    let mut aggregate: Vec<Value> = Vec::with_capacity(requests.len());
    let mut report = SubmitReport { output: output.clone(), items: Vec::new() };
    let mut failure: Option<CustodyError> = None;

    for (offset, (request, path)) in requests.iter().zip(&item_paths).enumerate() {
        // acknowledged items always reach the aggregate, even if their own file fails
        let outcome = match provider.submit_transaction(&session, request, &message).await {
            Ok(result) => merge_payment_result(details.get(offset), &result).and_then(|merged| {
                aggregate.push(merged);
                storage::write_new(path, &result)
            }),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => report.items.push(path.clone()),
            Err(e) => {
                error!(item = offset, error = %e, "batch submission stopped");
                failure = Some(e);
                break;
            }
        }
    }

    if !aggregate.is_empty() {
        storage::write_new(&output, &aggregate)?;
    }
    match failure {
        Some(e) => Err(e),
        None => {
            info!(count = report.items.len(), "batch submitted");
            Ok(report)
        }
    }
}

/// The OTP value supplied on the command line, if any.
pub fn otp_flag(value: Option<String>) -> Option<SecretString> {
    value.filter(|v| !v.is_empty()).map(SecretString::new)
}
