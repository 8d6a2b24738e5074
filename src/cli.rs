use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::provider::ProviderKind;
use crate::stager::KeySelector;

/// Air-gapped custody workflow (library-facing definitions)
#[derive(Debug, Parser)]
#[command(name = "custody", about = "Air-gapped custody workflow", version, disable_help_subcommand = true)]
pub struct Cli {
    /// Custody provider
    #[arg(long, global = true, value_enum, default_value_t = ProviderKind::Uphold)]
    pub provider: ProviderKind,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate keychains and their recovery files
    OfflineCreateKeychains {
        #[arg(long)]
        label: Option<String>,
        /// Shares needed to recover
        #[arg(long)]
        min: Option<i64>,
        /// Shares generated
        #[arg(long)]
        max: Option<i64>,
        #[arg(long)]
        keychains: Option<PathBuf>,
    },
    /// Register keychains with the provider
    OnlineCreateWallet {
        #[arg(long)]
        keychains: PathBuf,
        #[arg(long)]
        wallet: Option<PathBuf>,
        /// Account login; omit to use an access token
        #[arg(long)]
        user: Option<String>,
        #[command(flatten)]
        otp: OtpArg,
    },
    /// Build an unsigned transaction from a payments file
    OnlineCreateTransaction {
        #[arg(long)]
        wallet: PathBuf,
        #[arg(long)]
        payments: PathBuf,
        #[arg(long = "unsigned-tx")]
        unsigned_tx: Option<PathBuf>,
        #[command(flatten)]
        otp: OtpArg,
    },
    /// Sign an unsigned transaction with the matching keychain
    OfflineSignTransaction {
        #[arg(long = "unsigned-tx")]
        unsigned_tx: PathBuf,
        #[arg(long = "signed-tx")]
        signed_tx: Option<PathBuf>,
        #[arg(long)]
        keychains: Option<PathBuf>,
    },
    /// Submit a signed transaction
    OnlineSubmitTransaction {
        #[arg(long = "signed-tx")]
        signed_tx: PathBuf,
        #[arg(long = "submit-tx")]
        submit_tx: Option<PathBuf>,
        #[arg(long)]
        payments: Option<PathBuf>,
        #[command(flatten)]
        otp: OtpArg,
    },
    /// Split an arbitrary file into recovery shares
    OfflineSplitPassphrases {
        #[arg(long)]
        secrets: PathBuf,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        min: Option<i64>,
        #[arg(long)]
        max: Option<i64>,
    },
    /// Recombine shares from recovery files
    OfflineRecoverPassphrases {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print a decrypted private key to stdout
    OfflineShowKey {
        #[arg(long)]
        keychains: PathBuf,
        #[arg(long, value_enum, default_value_t = KeySelector::User)]
        key: KeySelector,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct OtpArg {
    /// One-time password; prompted for when needed and absent
    #[arg(long)]
    pub otp: Option<String>,
}
