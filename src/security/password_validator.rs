//! Passphrase strength validation
//!
//! Keychain passphrases protect offline key material for years, so the
//! policy favours length over character-class gymnastics.

use serde::{Deserialize, Serialize};

use crate::core::errors::CustodyError;

/// Passphrase strength grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassphraseStrength {
    Weak,
    Medium,
    Strong,
    VeryStrong,
}

/// Passphrase policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassphrasePolicy {
    #[serde(default = "PassphrasePolicy::default_min_length")]
    pub min_length: usize,
    #[serde(default = "PassphrasePolicy::default_min_strength")]
    pub min_strength: PassphraseStrength,
}

impl PassphrasePolicy {
    fn default_min_length() -> usize {
        12
    }

    fn default_min_strength() -> PassphraseStrength {
        PassphraseStrength::Strong
    }

    /// Lenient policy for sandbox runs and tests.
    pub fn lenient() -> Self {
        Self { min_length: 1, min_strength: PassphraseStrength::Weak }
    }
}

impl Default for PassphrasePolicy {
    fn default() -> Self {
        Self {
            min_length: Self::default_min_length(),
            min_strength: Self::default_min_strength(),
        }
    }
}

const COMMON_PASSPHRASES: &[&str] = &[
    "password", "123456", "12345678", "qwerty", "abc123", "letmein", "welcome", "monkey",
    "iloveyou", "passphrase",
];

/// Validate a passphrase against `policy`.
pub fn validate_passphrase(
    passphrase: &str,
    policy: &PassphrasePolicy,
) -> Result<PassphraseStrength, CustodyError> {
    if passphrase.is_empty() {
        return Err(CustodyError::ValidationError("passphrase cannot be empty".to_string()));
    }

    let length = passphrase.chars().count();
    if length < policy.min_length {
        return Err(CustodyError::ValidationError(format!(
            "passphrase needs at least {} characters",
            policy.min_length
        )));
    }

    let lower = passphrase.to_lowercase();
    if policy.min_strength > PassphraseStrength::Weak
        && COMMON_PASSPHRASES.iter().any(|&weak| lower.contains(weak))
    {
        return Err(CustodyError::ValidationError(
            "passphrase contains a common password".to_string(),
        ));
    }

    let strength = passphrase_strength(passphrase);
    if strength < policy.min_strength {
        return Err(CustodyError::ValidationError(format!(
            "passphrase too weak, need at least {:?}",
            policy.min_strength
        )));
    }

    Ok(strength)
}

fn passphrase_strength(passphrase: &str) -> PassphraseStrength {
    let mut score = match passphrase.chars().count() {
        0..=11 => 0,
        12..=15 => 2,
        16..=23 => 3,
        _ => 5,
    };

    if passphrase.chars().any(|c| c.is_lowercase()) {
        score += 1;
    }
    if passphrase.chars().any(|c| c.is_uppercase()) {
        score += 1;
    }
    if passphrase.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    }
    if passphrase.chars().any(|c| !c.is_alphanumeric()) {
        score += 2;
    }

    match score {
        0..=3 => PassphraseStrength::Weak,
        4..=5 => PassphraseStrength::Medium,
        6..=7 => PassphraseStrength::Strong,
        _ => PassphraseStrength::VeryStrong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_too_short() {
        let result = validate_passphrase("Sh0rt!", &PassphrasePolicy::default());
        assert!(matches!(result, Err(CustodyError::ValidationError(_))));
    }

    #[test]
    fn test_passphrase_common() {
        let result = validate_passphrase("MyPassword-2024-extra", &PassphrasePolicy::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_diceware_phrase_is_strong() {
        let strength =
            validate_passphrase("correct horse battery staple", &PassphrasePolicy::default())
                .unwrap();
        assert!(strength >= PassphraseStrength::Strong);
    }

    #[test]
    fn test_mixed_phrase_is_strong() {
        let strength =
            validate_passphrase("Tr0ub4dor&3-Orbit", &PassphrasePolicy::default()).unwrap();
        assert!(strength >= PassphraseStrength::Strong);
    }

    #[test]
    fn test_long_but_single_class_is_rejected() {
        let result = validate_passphrase("aaaaaaaaaaaaaaa", &PassphrasePolicy::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_lenient_policy() {
        assert!(validate_passphrase("simple", &PassphrasePolicy::lenient()).is_ok());
        assert!(validate_passphrase("", &PassphrasePolicy::lenient()).is_err());
    }
}
