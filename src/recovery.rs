//! Passphrase recovery through threshold secret sharing.
//!
//! At keychain creation every passphrase is split with the same `(M, N)` and
//! share `i` of every passphrase is written into recovery artifact `i`. Any
//! `M` recovery artifacts later give back the passphrases.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::core::artifacts::{
    share_field, KeychainArtifact, RecoveryArtifact, RecoveryKeyRecord, SecretsRecoveryArtifact,
    SHARE_FIELD_PREFIX,
};
use crate::core::config::RunConfig;
use crate::core::errors::{CustodyError, CustodyResult};
use crate::keychain;
use crate::security::SecretVec;
use crate::shamir::{self, Share, ShamirError, ShareSet};
use crate::storage::naming;

pub const DEFAULT_THRESHOLD: i64 = 2;
pub const DEFAULT_TOTAL: i64 = 3;

/// Share parameters after the lenient repair of operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    pub min: u8,
    pub max: u8,
}

/// Coerce requested `(M, N)`: `N < 2` becomes 2, `M > N` becomes `N`,
/// and `M < 2` is raised to 2. `N` is capped at 255.
pub fn normalize_threshold(min: Option<i64>, max: Option<i64>) -> Threshold {
    let mut max = max.unwrap_or(DEFAULT_TOTAL);
    let mut min = min.unwrap_or(DEFAULT_THRESHOLD);
    if max < 2 {
        max = 2;
    }
    if max > u8::MAX as i64 {
        max = u8::MAX as i64;
    }
    if min > max {
        min = max;
    }
    if min < shamir::MIN_THRESHOLD as i64 {
        min = shamir::MIN_THRESHOLD as i64;
    }
    Threshold { min: min as u8, max: max as u8 }
}

/// Canonical keychain artifact plus one recovery artifact per share index.
#[derive(Debug, Clone)]
pub struct RecoveryBundle {
    pub keychains: KeychainArtifact,
    pub threshold: Threshold,
    /// `(file name, artifact)` ordered by share index.
    pub recovery: Vec<(String, RecoveryArtifact)>,
}

fn split_passphrase(passphrase: &SecretString, threshold: Threshold) -> CustodyResult<ShareSet> {
    Ok(shamir::split(passphrase.expose_secret().as_bytes(), threshold.min, threshold.max)?)
}

fn share_hex(set: &ShareSet, index: u8) -> CustodyResult<String> {
    set.get(index)
        .map(Share::to_hex)
        .ok_or_else(|| CustodyError::CorruptShare(format!("missing share {}", index)))
}

/// Create keychains and split their passphrases into recovery artifacts.
pub fn create_with_recovery(
    config: &RunConfig,
    label: &str,
    passphrase1: &SecretString,
    passphrase2: Option<&SecretString>,
    threshold: Threshold,
) -> CustodyResult<RecoveryBundle> {
    let keychains = keychain::create_keychains(config, label, passphrase1, passphrase2)?;

    let user_shares = split_passphrase(passphrase1, threshold)?;
    let backup_shares = match (&keychains.backup_key, passphrase2) {
        (Some(_), Some(p2)) => Some(split_passphrase(p2, threshold)?),
        _ => None,
    };

    let mut recovery = Vec::with_capacity(threshold.max as usize);
    for index in 1..=threshold.max {
        let backup_key = match (&keychains.backup_key, &backup_shares) {
            (Some(backup), Some(shares)) => {
                Some(RecoveryKeyRecord::new(backup.clone(), index, share_hex(shares, index)?))
            }
            _ => None,
        };
        let artifact = RecoveryArtifact {
            label: keychains.label.clone(),
            config: keychains.config,
            user_key: RecoveryKeyRecord::new(
                keychains.user_key.clone(),
                index,
                share_hex(&user_shares, index)?,
            ),
            backup_key,
        };
        recovery.push((naming::recovery_file(index, threshold.min, threshold.max, label), artifact));
    }

    info!(label, m = threshold.min, n = threshold.max, "passphrases split for recovery");
    Ok(RecoveryBundle { keychains, threshold, recovery })
}

/// Split an arbitrary secret into standalone recovery artifacts.
pub fn split_secret(
    secret: &[u8],
    label: &str,
    threshold: Threshold,
) -> CustodyResult<Vec<(String, SecretsRecoveryArtifact)>> {
    let set = shamir::split(secret, threshold.min, threshold.max)?;
    set.shares
        .iter()
        .map(|share| {
            let mut secrets = BTreeMap::new();
            secrets.insert(share_field(share.index()), share.to_hex());
            Ok((
                naming::recovery_file(share.index(), threshold.min, threshold.max, label),
                SecretsRecoveryArtifact { secrets },
            ))
        })
        .collect()
}

/// Identity of one recovered secret: the record type (`userKey`,
/// `backupKey`, `secrets`) and, for keychains, the public key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SecretGroup {
    pub kind: String,
    pub xpub: Option<String>,
}

impl SecretGroup {
    pub fn name(&self) -> String {
        match &self.xpub {
            Some(xpub) => format!("{}.{}", self.kind, xpub),
            None => self.kind.clone(),
        }
    }
}

/// Outcome for one group; failures do not abort the other groups.
#[derive(Debug)]
pub struct RecoveredSecret {
    pub group: SecretGroup,
    pub result: CustodyResult<SecretVec>,
}

/// Collect share strings from recovery artifacts, grouped by secret.
pub fn collect_shares(artifacts: &[Value]) -> BTreeMap<SecretGroup, Vec<String>> {
    let mut groups: BTreeMap<SecretGroup, Vec<String>> = BTreeMap::new();
    for artifact in artifacts {
        let Some(object) = artifact.as_object() else {
            warn!("skipping recovery artifact that is not a JSON object");
            continue;
        };
        for (kind, record) in object {
            if kind == "config" {
                continue;
            }
            let Some(record) = record.as_object() else {
                continue;
            };
            let shares: Vec<String> = record
                .iter()
                .filter(|(field, _)| field.starts_with(SHARE_FIELD_PREFIX))
                .filter_map(|(_, value)| value.as_str().map(str::to_string))
                .collect();
            if shares.is_empty() {
                continue;
            }
            let group = SecretGroup {
                kind: kind.clone(),
                xpub: record.get("xpub").and_then(Value::as_str).map(str::to_string),
            };
            groups.entry(group).or_default().extend(shares);
        }
    }
    groups
}

fn combine_group(group: &SecretGroup, encoded: &[String]) -> CustodyResult<SecretVec> {
    let shares = encoded
        .iter()
        .map(|hex| Share::from_hex(hex))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CustodyError::CorruptShare(format!("{}: {}", group.name(), e)))?;
    shamir::combine(&shares).map_err(|e| match e {
        ShamirError::InsufficientShares { needed, have } => {
            CustodyError::InsufficientShares { group: group.name(), needed, have }
        }
        ShamirError::CorruptShare(msg) => CustodyError::CorruptShare(format!("{}: {}", group.name(), msg)),
        other => other.into(),
    })
}

/// Reconstruct every secret for which shares are present.
pub fn recover_passphrases(artifacts: &[Value]) -> Vec<RecoveredSecret> {
    collect_shares(artifacts)
        .into_iter()
        .map(|(group, shares)| {
            let result = combine_group(&group, &shares);
            match &result {
                Ok(_) => info!(group = %group.name(), shares = shares.len(), "secret recovered"),
                Err(e) => warn!(group = %group.name(), error = %e, "recovery failed"),
            }
            RecoveredSecret { group, result }
        })
        .collect()
}
