pub mod kdf;

pub use self::kdf::{hkdf_sha256, KeyDerivation, PasswordKdf};
