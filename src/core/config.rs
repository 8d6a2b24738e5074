use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::errors::{CustodyError, CustodyResult};
use crate::crypto::kdf::{PasswordKdf, DEFAULT_PBKDF2_ITERATIONS};
use crate::provider::ProviderKind;
use crate::security::PassphrasePolicy;

/// Name of the optional overrides file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "custody.toml";

/// Operating environment of the selected provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Prod,
    Test,
}

impl Environment {
    /// Parse an environment name, folding the provider-specific aliases.
    pub fn parse(value: &str) -> CustodyResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Prod),
            "test" | "sandbox" => Ok(Environment::Test),
            other => Err(CustodyError::ConfigError(format!(
                "invalid operating environment: {}",
                other
            ))),
        }
    }

    /// Read `<PROVIDER>_ENV` or `<PROVIDER>_ENVIRONMENT`, defaulting to prod.
    pub fn from_env(provider: ProviderKind) -> CustodyResult<Self> {
        let prefix = provider.as_str().to_ascii_uppercase();
        let value = std::env::var(format!("{}_ENV", prefix))
            .or_else(|_| std::env::var(format!("{}_ENVIRONMENT", prefix)));
        match value {
            Ok(v) => Self::parse(&v),
            Err(_) => Ok(Environment::Prod),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Test => "test",
        }
    }
}

/// Password KDF settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfConfig {
    #[serde(default = "KdfConfig::default_algorithm")]
    pub algorithm: String,
    #[serde(default = "KdfConfig::default_iterations")]
    pub iterations: u32,
    #[serde(default = "KdfConfig::default_scrypt_log_n")]
    pub scrypt_log_n: u8,
    #[serde(default = "KdfConfig::default_scrypt_r")]
    pub scrypt_r: u32,
    #[serde(default = "KdfConfig::default_scrypt_p")]
    pub scrypt_p: u32,
}

impl KdfConfig {
    fn default_algorithm() -> String { "pbkdf2".to_string() }
    fn default_iterations() -> u32 { DEFAULT_PBKDF2_ITERATIONS }
    fn default_scrypt_log_n() -> u8 { 17 }
    fn default_scrypt_r() -> u32 { 8 }
    fn default_scrypt_p() -> u32 { 1 }

    pub fn password_kdf(&self) -> CustodyResult<PasswordKdf> {
        match self.algorithm.as_str() {
            "pbkdf2" => Ok(PasswordKdf::Pbkdf2 { iter: self.iterations }),
            "scrypt" => Ok(PasswordKdf::Scrypt {
                log_n: self.scrypt_log_n,
                r: self.scrypt_r,
                p: self.scrypt_p,
            }),
            other => Err(CustodyError::ConfigError(format!("unknown KDF algorithm: {}", other))),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: Self::default_algorithm(),
            iterations: Self::default_iterations(),
            scrypt_log_n: Self::default_scrypt_log_n(),
            scrypt_r: Self::default_scrypt_r(),
            scrypt_p: Self::default_scrypt_p(),
        }
    }
}

/// Cosigning provider endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitGoConfig {
    #[serde(default = "BitGoConfig::default_prod_url")]
    pub prod_url: String,
    #[serde(default = "BitGoConfig::default_test_url")]
    pub test_url: String,
    /// Confirmation target used for fee estimation
    #[serde(default = "BitGoConfig::default_fee_blocks")]
    pub fee_blocks: u32,
}

impl BitGoConfig {
    fn default_prod_url() -> String { "https://www.bitgo.com".to_string() }
    fn default_test_url() -> String { "https://test.bitgo.com".to_string() }
    fn default_fee_blocks() -> u32 { 6 }
}

impl Default for BitGoConfig {
    fn default() -> Self {
        Self {
            prod_url: Self::default_prod_url(),
            test_url: Self::default_test_url(),
            fee_blocks: Self::default_fee_blocks(),
        }
    }
}

/// Account provider endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpholdConfig {
    #[serde(default = "UpholdConfig::default_prod_url")]
    pub prod_url: String,
    #[serde(default = "UpholdConfig::default_test_url")]
    pub test_url: String,
    #[serde(default = "UpholdConfig::default_currency")]
    pub currency: String,
}

impl UpholdConfig {
    fn default_prod_url() -> String { "https://api.uphold.com".to_string() }
    fn default_test_url() -> String { "https://api-sandbox.uphold.com".to_string() }
    fn default_currency() -> String { "BAT".to_string() }
}

impl Default for UpholdConfig {
    fn default() -> Self {
        Self {
            prod_url: Self::default_prod_url(),
            test_url: Self::default_test_url(),
            currency: Self::default_currency(),
        }
    }
}

/// Contents of `custody.toml`; every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub kdf: KdfConfig,
    #[serde(default)]
    pub passphrase: PassphrasePolicy,
    #[serde(default)]
    pub bitgo: BitGoConfig,
    #[serde(default)]
    pub uphold: UpholdConfig,
    #[serde(default = "FileConfig::default_http_timeout")]
    pub http_timeout_seconds: u64,
}

impl FileConfig {
    fn default_http_timeout() -> u64 { 60 }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            kdf: KdfConfig::default(),
            passphrase: PassphrasePolicy::default(),
            bitgo: BitGoConfig::default(),
            uphold: UpholdConfig::default(),
            http_timeout_seconds: Self::default_http_timeout(),
        }
    }
}

/// Immutable run configuration handed to every component.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub provider: ProviderKind,
    pub environment: Environment,
    pub work_dir: PathBuf,
    pub kdf: PasswordKdf,
    pub passphrase_policy: PassphrasePolicy,
    pub bitgo: BitGoConfig,
    pub uphold: UpholdConfig,
    pub http_timeout_seconds: u64,
}

impl RunConfig {
    /// Configuration with built-in defaults.
    pub fn new(provider: ProviderKind, environment: Environment, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            environment,
            work_dir: work_dir.into(),
            kdf: PasswordKdf::Pbkdf2 { iter: DEFAULT_PBKDF2_ITERATIONS },
            passphrase_policy: PassphrasePolicy::default(),
            bitgo: BitGoConfig::default(),
            uphold: UpholdConfig::default(),
            http_timeout_seconds: FileConfig::default_http_timeout(),
        }
    }

    /// Build from the process environment and an optional TOML overrides file.
    ///
    /// The file is taken from `CUSTODY_CONFIG` when set, otherwise
    /// `custody.toml` in `work_dir` if it exists.
    pub fn load(provider: ProviderKind, work_dir: impl Into<PathBuf>) -> CustodyResult<Self> {
        let work_dir = work_dir.into();
        let environment = Environment::from_env(provider)?;

        let path = match std::env::var("CUSTODY_CONFIG") {
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => {
                let candidate = work_dir.join(CONFIG_FILE_NAME);
                candidate.exists().then_some(candidate)
            }
        };

        let file_config = match path {
            Some(path) => load_file_config(&path)?,
            None => {
                debug!("no configuration file, using defaults");
                FileConfig::default()
            }
        };

        let config = Self::from_file_config(provider, environment, work_dir, file_config)?;
        info!(
            provider = config.provider.as_str(),
            env = config.environment.as_str(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn from_file_config(
        provider: ProviderKind,
        environment: Environment,
        work_dir: PathBuf,
        file: FileConfig,
    ) -> CustodyResult<Self> {
        Ok(Self {
            provider,
            environment,
            work_dir,
            kdf: file.kdf.password_kdf()?,
            passphrase_policy: file.passphrase,
            bitgo: file.bitgo,
            uphold: file.uphold,
            http_timeout_seconds: file.http_timeout_seconds,
        })
    }

    /// Replace the KDF (tests use cheap parameters).
    pub fn with_kdf(mut self, kdf: PasswordKdf) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_passphrase_policy(mut self, policy: PassphrasePolicy) -> Self {
        self.passphrase_policy = policy;
        self
    }

    pub fn with_bitgo_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.bitgo.prod_url = url.clone();
        self.bitgo.test_url = url;
        self
    }

    pub fn with_uphold_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.uphold.prod_url = url.clone();
        self.uphold.test_url = url;
        self
    }

    /// Base URL of the selected provider in the selected environment.
    pub fn base_url(&self) -> &str {
        match (self.provider, self.environment) {
            (ProviderKind::Bitgo, Environment::Prod) => &self.bitgo.prod_url,
            (ProviderKind::Bitgo, Environment::Test) => &self.bitgo.test_url,
            (ProviderKind::Uphold, Environment::Prod) => &self.uphold.prod_url,
            (ProviderKind::Uphold, Environment::Test) => &self.uphold.test_url,
        }
    }

    /// Resolve a user-supplied path against the working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }
}

fn load_file_config(path: &Path) -> CustodyResult<FileConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CustodyError::ConfigError(format!("failed to read {}: {}", path.display(), e))
    })?;
    let config: FileConfig = toml::from_str(&content)
        .map_err(|e| CustodyError::ConfigError(format!("{}: {}", path.display(), e)))?;
    info!(path = %path.display(), "loaded configuration file");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_aliases() {
        assert_eq!(Environment::parse("sandbox").unwrap(), Environment::Test);
        assert_eq!(Environment::parse("production").unwrap(), Environment::Prod);
        assert_eq!(Environment::parse("TEST").unwrap(), Environment::Test);
        assert!(matches!(Environment::parse("staging"), Err(CustodyError::ConfigError(_))));
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::new(ProviderKind::Uphold, Environment::Test, ".");
        assert_eq!(config.kdf, PasswordKdf::Pbkdf2 { iter: 100_000 });
        assert_eq!(config.base_url(), "https://api-sandbox.uphold.com");
        assert_eq!(config.uphold.currency, "BAT");
        assert_eq!(config.http_timeout_seconds, 60);
    }

    #[test]
    fn test_file_config_overrides() {
        let file: FileConfig = toml::from_str(
            r#"
            http_timeout_seconds = 5

            [kdf]
            algorithm = "scrypt"
            scrypt_log_n = 15

            [bitgo]
            fee_blocks = 2
            "#,
        )
        .unwrap();
        let config =
            RunConfig::from_file_config(ProviderKind::Bitgo, Environment::Prod, ".".into(), file)
                .unwrap();
        assert_eq!(config.kdf, PasswordKdf::Scrypt { log_n: 15, r: 8, p: 1 });
        assert_eq!(config.bitgo.fee_blocks, 2);
        assert_eq!(config.base_url(), "https://www.bitgo.com");
        assert_eq!(config.http_timeout_seconds, 5);
    }

    #[test]
    fn test_unknown_bitgo_key_rejected() {
        // the multisig endpoints are bitcoin-only; there is no coin selector
        let res: Result<FileConfig, _> = toml::from_str("[bitgo]\ncoin = \"tbtc\"");
        assert!(res.is_err());
    }

    #[test]
    fn test_unknown_kdf_rejected() {
        let file: FileConfig = toml::from_str("[kdf]\nalgorithm = \"md5\"").unwrap();
        let res =
            RunConfig::from_file_config(ProviderKind::Bitgo, Environment::Prod, ".".into(), file);
        assert!(matches!(res, Err(CustodyError::ConfigError(_))));
    }

    #[test]
    fn test_resolve_relative_paths() {
        let config = RunConfig::new(ProviderKind::Bitgo, Environment::Prod, "/tmp/work");
        assert_eq!(config.resolve("a.json"), PathBuf::from("/tmp/work/a.json"));
        assert_eq!(config.resolve("/abs/b.json"), PathBuf::from("/abs/b.json"));
    }
}
