//! Key generation and signing, dispatched on the configured provider.
//!
//! Everything here runs on the offline machine. Plaintext private material
//! exists only inside these functions and is zeroized when they return.

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::core::artifacts::{
    ArtifactConfig, Keychain, KeychainArtifact, SignedTransaction, UnsignedTransaction,
};
use crate::core::config::RunConfig;
use crate::core::errors::{CustodyError, CustodyResult};
use crate::provider::{bitgo, uphold, ProviderKind};
use crate::security::secret::secrets_equal;
use crate::security::{validate_passphrase, KeyCustodian, SecretVec};

pub const USER_KEY_LABEL: &str = "user";
pub const BACKUP_KEY_LABEL: &str = "backup";

/// Check passphrase presence and strength for the configured provider.
///
/// Multisig providers need two distinct passphrases; account providers one.
pub fn check_passphrases(
    config: &RunConfig,
    passphrase1: &SecretString,
    passphrase2: Option<&SecretString>,
) -> CustodyResult<()> {
    if passphrase1.expose_secret().is_empty() {
        return Err(CustodyError::ValidationError("invalid passphrase".into()));
    }
    validate_passphrase(passphrase1.expose_secret(), &config.passphrase_policy)?;

    if config.provider.is_multisig() {
        let passphrase2 = passphrase2
            .filter(|p| !p.expose_secret().is_empty())
            .ok_or_else(|| CustodyError::ValidationError("invalid passphrases".into()))?;
        if secrets_equal(passphrase1, passphrase2) {
            return Err(CustodyError::ValidationError(
                "invalid passphrases: user and backup passphrases must differ".into(),
            ));
        }
        validate_passphrase(passphrase2.expose_secret(), &config.passphrase_policy)?;
    }
    Ok(())
}

/// Generate the keychains for `label`, each private half encrypted under its passphrase.
pub fn create_keychains(
    config: &RunConfig,
    label: &str,
    passphrase1: &SecretString,
    passphrase2: Option<&SecretString>,
) -> CustodyResult<KeychainArtifact> {
    check_passphrases(config, passphrase1, passphrase2)?;
    let custodian = KeyCustodian::new(config.kdf.clone());

    let (user_key, backup_key) = match config.provider {
        ProviderKind::Bitgo => {
            let user = bitgo::offline::create_keychain(
                &custodian,
                config.environment,
                USER_KEY_LABEL,
                passphrase1,
            )?;
            let passphrase2 = passphrase2
                .ok_or_else(|| CustodyError::ValidationError("invalid passphrases".into()))?;
            let backup = bitgo::offline::create_keychain(
                &custodian,
                config.environment,
                BACKUP_KEY_LABEL,
                passphrase2,
            )?;
            (user, Some(backup))
        }
        ProviderKind::Uphold => {
            let user = uphold::offline::create_keychain(
                &custodian,
                label,
                &config.uphold.currency,
                passphrase1,
            )?;
            (user, None)
        }
    };

    info!(provider = %config.provider, label, "keychains created");
    Ok(KeychainArtifact {
        label: Some(label.to_string()),
        config: Some(ArtifactConfig { env: config.environment }),
        user_key,
        backup_key,
    })
}

/// Decrypt `keychain` and sign `unsigned` with it.
pub fn sign_transaction(
    config: &RunConfig,
    unsigned: &UnsignedTransaction,
    keychain: &Keychain,
    passphrase: &SecretString,
) -> CustodyResult<SignedTransaction> {
    let custodian = KeyCustodian::new(config.kdf.clone());
    match unsigned {
        UnsignedTransaction::BitGo(tx) => Ok(SignedTransaction::BitGo(
            bitgo::offline::sign_transaction(&custodian, tx, keychain, passphrase)?,
        )),
        UnsignedTransaction::Uphold(batch) => Ok(SignedTransaction::Uphold(
            uphold::offline::sign_transactions(&custodian, batch, keychain, passphrase)?,
        )),
    }
}

/// Decrypt the private material of `keychain` for export.
pub fn reveal_private_key(
    config: &RunConfig,
    keychain: &Keychain,
    passphrase: &SecretString,
) -> CustodyResult<SecretVec> {
    let custodian = KeyCustodian::new(config.kdf.clone());
    Ok(custodian.decrypt(passphrase, &keychain.encrypted_xprv)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Environment;
    use crate::crypto::kdf::PasswordKdf;
    use crate::security::PassphrasePolicy;

    fn config(provider: ProviderKind) -> RunConfig {
        RunConfig::new(provider, Environment::Test, ".")
            .with_kdf(PasswordKdf::Pbkdf2 { iter: 1_000 })
    }

    fn pass(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    #[test]
    fn test_multisig_needs_two_distinct_passphrases() {
        let config = config(ProviderKind::Bitgo);
        let p = pass("Correct-Horse-Battery-9");
        assert!(create_keychains(&config, "l", &p, None).is_err());
        assert!(create_keychains(&config, "l", &p, Some(&pass("Correct-Horse-Battery-9"))).is_err());

        let set = create_keychains(&config, "l", &p, Some(&pass("Staple-Orbit-Lantern-4"))).unwrap();
        assert_eq!(set.user_key.label, "user");
        assert_eq!(set.backup_key.as_ref().unwrap().label, "backup");
        assert_ne!(set.user_key.xpub, set.backup_key.unwrap().xpub);
    }

    #[test]
    fn test_weak_passphrase_rejected() {
        let config = config(ProviderKind::Uphold);
        assert!(matches!(
            create_keychains(&config, "l", &pass("short"), None),
            Err(CustodyError::ValidationError(_))
        ));
        let lenient = config.with_passphrase_policy(PassphrasePolicy::lenient());
        assert!(create_keychains(&lenient, "l", &pass("short"), None).is_ok());
    }

    #[test]
    fn test_account_keychain_and_reveal() {
        let config = config(ProviderKind::Uphold);
        let p = pass("Correct-Horse-Battery-9");
        let set = create_keychains(&config, "treasury", &p, None).unwrap();
        assert!(set.backup_key.is_none());
        assert_eq!(set.config, Some(ArtifactConfig { env: Environment::Test }));
        assert_eq!(
            set.user_key.payload.as_ref().and_then(|p| p.body_label()),
            Some("treasury")
        );

        let secret = reveal_private_key(&config, &set.user_key, &p).unwrap();
        assert_eq!(secret.len(), 64);
        assert!(matches!(
            reveal_private_key(&config, &set.user_key, &pass("nope")),
            Err(CustodyError::InvalidPassphrase)
        ));
    }
}
