// src/main.rs
//! Custody workflow entry point: one subcommand per artifact transition.
use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use airgap_custody::cli::{Cli, Commands};
use airgap_custody::core::config::RunConfig;
use airgap_custody::prompt::TerminalPrompter;
use airgap_custody::provider::build_adapter;
use airgap_custody::stager::{self, otp_flag};
use airgap_custody::CustodyError;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let result = run(cli).await;
    if let Err(e) = &result {
        if e.downcast_ref::<CustodyError>().is_some_and(CustodyError::is_critical) {
            error!(error = %e, "key material could not be used; no artifact was written");
        }
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let config = RunConfig::load(cli.provider, std::env::current_dir()?)?;
    info!(
        provider = %config.provider,
        env = config.environment.as_str(),
        "custody v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut prompter = TerminalPrompter;
    match cli.command {
        Commands::OfflineCreateKeychains { label, min, max, keychains } => {
            let args = stager::CreateKeychainsArgs { label, min, max, keychains };
            print_paths(&stager::create_keychains(&config, &mut prompter, &args)?);
        }
        Commands::OnlineCreateWallet { keychains, wallet, user, otp } => {
            let provider = build_adapter(&config)?;
            let args = stager::CreateWalletArgs { keychains, wallet, user, otp: otp_flag(otp.otp) };
            let path = stager::create_wallet(&config, provider.as_ref(), &mut prompter, &args).await?;
            print_paths(&[path]);
        }
        Commands::OnlineCreateTransaction { wallet, payments, unsigned_tx, otp } => {
            let provider = build_adapter(&config)?;
            let args = stager::CreateTransactionArgs {
                wallet,
                payments,
                unsigned_tx,
                otp: otp_flag(otp.otp),
            };
            let path =
                stager::create_transaction(&config, provider.as_ref(), &mut prompter, &args).await?;
            print_paths(&[path]);
        }
        Commands::OfflineSignTransaction { unsigned_tx, signed_tx, keychains } => {
            let args = stager::SignTransactionArgs { unsigned_tx, signed_tx, keychains };
            print_paths(&[stager::sign_transaction(&config, &mut prompter, &args)?]);
        }
        Commands::OnlineSubmitTransaction { signed_tx, submit_tx, payments, otp } => {
            let provider = build_adapter(&config)?;
            let args = stager::SubmitTransactionArgs {
                signed_tx,
                submit_tx,
                payments,
                otp: otp_flag(otp.otp),
            };
            let report =
                stager::submit_transaction(&config, provider.as_ref(), &mut prompter, &args).await?;
            print_paths(&report.items);
            if report.items.last() != Some(&report.output) {
                print_paths(&[report.output]);
            }
        }
        Commands::OfflineSplitPassphrases { secrets, label, min, max } => {
            let args = stager::SplitPassphrasesArgs { secrets, label, min, max };
            print_paths(&stager::split_passphrases(&config, &args)?);
        }
        Commands::OfflineRecoverPassphrases { files } => {
            let recovered = stager::recover_passphrases(&config, &files)?;
            let mut failed = 0usize;
            let mut stdout = std::io::stdout().lock();
            for secret in recovered {
                match secret.result {
                    Ok(bytes) if secret.group.xpub.is_some() => {
                        writeln!(stdout, "{} {}", secret.group.name(), String::from_utf8_lossy(&bytes))?;
                    }
                    Ok(bytes) => stdout.write_all(&bytes)?,
                    Err(e) => {
                        failed += 1;
                        error!(group = %secret.group.name(), error = %e, "recovery failed");
                    }
                }
            }
            stdout.flush()?;
            if failed > 0 {
                anyhow::bail!("{} secret group(s) could not be recovered", failed);
            }
        }
        Commands::OfflineShowKey { keychains, key } => {
            let args = stager::ShowKeyArgs { keychains, key };
            let secret = stager::show_key(&config, &mut prompter, &args)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&secret)?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}

fn print_paths(paths: &[PathBuf]) {
    for path in paths {
        println!("{}", path.display());
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::TRACE)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
