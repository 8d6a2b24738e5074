use airgap_custody::crypto::kdf::PasswordKdf;
use airgap_custody::security::{CipherError, KeyCustodian};
use proptest::prelude::*;
use secrecy::SecretString;

fn custodian() -> KeyCustodian {
    KeyCustodian::new(PasswordKdf::Pbkdf2 { iter: 1_000 })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn encrypt_then_decrypt_returns_plaintext(
        passphrase in "[ -~]{1,40}",
        plaintext in proptest::collection::vec(any::<u8>(), 0..128)
    ) {
        let passphrase = SecretString::new(passphrase);
        let blob = custodian().encrypt(&passphrase, &plaintext).unwrap();
        let decrypted = custodian().decrypt(&passphrase, &blob).unwrap();
        prop_assert_eq!(decrypted.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn wrong_passphrase_is_rejected(
        passphrase in "[a-z]{8,16}",
        plaintext in proptest::collection::vec(any::<u8>(), 1..64)
    ) {
        let blob = custodian().encrypt(&SecretString::new(passphrase.clone()), &plaintext).unwrap();
        let wrong = SecretString::new(format!("{}!", passphrase));
        prop_assert_eq!(custodian().decrypt(&wrong, &blob).unwrap_err(), CipherError::InvalidPassphrase);
    }
}

#[test]
fn test_blob_carries_its_kdf() {
    let passphrase = SecretString::new("Correct-Horse-Battery-9".into());
    let blob = KeyCustodian::new(PasswordKdf::Scrypt { log_n: 10, r: 8, p: 1 })
        .encrypt(&passphrase, b"xprv")
        .unwrap();

    // decrypting with a differently configured custodian still uses the blob's parameters
    let plain = custodian().decrypt(&passphrase, &blob).unwrap();
    assert_eq!(plain.as_slice(), b"xprv");

    let json = serde_json::to_value(&blob).unwrap();
    assert_eq!(json["kdf"], "scrypt");
    assert_eq!(json["logN"], 10);
    assert_eq!(json["cipher"], "aes-256-gcm");
}

#[test]
fn test_tampered_ciphertext_fails_closed() {
    let passphrase = SecretString::new("Correct-Horse-Battery-9".into());
    let mut blob = custodian().encrypt(&passphrase, b"private material").unwrap();
    blob.iv = "AAAA".into();
    assert!(matches!(custodian().decrypt(&passphrase, &blob), Err(CipherError::Corrupt(_))));
}
