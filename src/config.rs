// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed configuration
//! structs built from them. Everything is validated once, at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `APP_ENV` | `local`, `development`, `test`, `staging` or `production` | `local` |
//! | `SIGNATURE_WINDOW_SECS` | Freshness window for signed requests | `60` |
//! | `NONCE_WINDOW_SECS` | How long a nonce stays "used" | `60` |
//! | `NONCE_MAX_MEMORY_SIZE` | Capacity of the in-memory nonce store | `10000` |
//! | `PUBLIC_KEY_CACHE_MAX_MEMORY_SIZE` | L1 public key cache capacity | `1000` |
//! | `PUBLIC_KEY_CACHE_MEMORY_TTL_SECS` | L1 entry lifetime | `300` |
//! | `PUBLIC_KEY_CACHE_DISTRIBUTED_TTL_SECS` | L2 entry lifetime | `3600` |
//! | `OTP_EXPIRY_SECS` | OTP code lifetime | `300` |
//! | `OTP_VERIFIED_TOKEN_EXPIRY_SECS` | Verified-token lifetime | `900` |
//! | `OTP_MAX_ATTEMPTS` | Wrong guesses before lockout | `5` |
//! | `OTP_RATE_LIMIT_MAX` | Codes issued per window per email+purpose | `3` |
//! | `OTP_RATE_LIMIT_WINDOW_SECS` | Rate limit window | `300` |
//! | `OTP_FAST_PATH` | Cache plaintext codes for fast verification | `true` |
//! | `PRIVATE_KEY_ENCRYPTION_SECRET` | Master secret for private key envelopes | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::signature::DEFAULT_SIGNATURE_WINDOW;

pub const APP_ENV_ENV: &str = "APP_ENV";
pub const SIGNATURE_WINDOW_ENV: &str = "SIGNATURE_WINDOW_SECS";
pub const NONCE_WINDOW_ENV: &str = "NONCE_WINDOW_SECS";
pub const NONCE_MAX_MEMORY_SIZE_ENV: &str = "NONCE_MAX_MEMORY_SIZE";
pub const PUBLIC_KEY_CACHE_MAX_MEMORY_SIZE_ENV: &str = "PUBLIC_KEY_CACHE_MAX_MEMORY_SIZE";
pub const PUBLIC_KEY_CACHE_MEMORY_TTL_ENV: &str = "PUBLIC_KEY_CACHE_MEMORY_TTL_SECS";
pub const PUBLIC_KEY_CACHE_DISTRIBUTED_TTL_ENV: &str = "PUBLIC_KEY_CACHE_DISTRIBUTED_TTL_SECS";
pub const OTP_EXPIRY_ENV: &str = "OTP_EXPIRY_SECS";
pub const OTP_VERIFIED_TOKEN_EXPIRY_ENV: &str = "OTP_VERIFIED_TOKEN_EXPIRY_SECS";
pub const OTP_MAX_ATTEMPTS_ENV: &str = "OTP_MAX_ATTEMPTS";
pub const OTP_RATE_LIMIT_MAX_ENV: &str = "OTP_RATE_LIMIT_MAX";
pub const OTP_RATE_LIMIT_WINDOW_ENV: &str = "OTP_RATE_LIMIT_WINDOW_SECS";
pub const OTP_FAST_PATH_ENV: &str = "OTP_FAST_PATH";
pub const PRIVATE_KEY_ENCRYPTION_SECRET_ENV: &str = "PRIVATE_KEY_ENCRYPTION_SECRET";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Sweep period for the in-memory tiers.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound for every configured window, TTL and interval (30 days).
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration errors. Raised once, at construction.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} must be true or false, got {value:?}")]
    InvalidBool { name: &'static str, value: String },
    #[error("Unknown environment {0:?}")]
    UnknownEnvironment(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} must be at most {max_secs} seconds")]
    TooLarge { name: &'static str, max_secs: u64 },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Local,
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Environments where a single-instance, memory-only setup is expected.
    pub fn is_local_or_dev(self) -> bool {
        matches!(self, Environment::Local | Environment::Development)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

fn bounded_duration(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Zero(name));
    }
    if value > MAX_DURATION {
        return Err(ConfigError::TooLarge {
            name,
            max_secs: MAX_DURATION.as_secs(),
        });
    }
    Ok(())
}

fn non_zero<T: Default + PartialEq>(name: &'static str, value: T) -> Result<(), ConfigError> {
    if value == T::default() {
        return Err(ConfigError::Zero(name));
    }
    Ok(())
}

/// Signed request verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureConfig {
    pub window: Duration,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_SIGNATURE_WINDOW,
        }
    }
}

impl SignatureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        bounded_duration(SIGNATURE_WINDOW_ENV, self.window)
    }
}

/// Replay prevention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceConfig {
    pub window: Duration,
    /// Memory backend capacity; the oldest nonce is evicted beyond it
    pub max_memory_size: usize,
    pub sweep_interval: Duration,
    /// Namespace for distributed keys
    pub key_prefix: String,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_memory_size: 10_000,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            key_prefix: "nonce:".to_string(),
        }
    }
}

impl NonceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        bounded_duration(NONCE_WINDOW_ENV, self.window)?;
        non_zero(NONCE_MAX_MEMORY_SIZE_ENV, self.max_memory_size)?;
        bounded_duration("nonce sweep interval", self.sweep_interval)
    }
}

/// Public key cache tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCacheConfig {
    pub max_memory_size: usize,
    pub memory_ttl: Duration,
    pub distributed_ttl: Duration,
    pub sweep_interval: Duration,
    pub key_prefix: String,
}

impl Default for PublicKeyCacheConfig {
    fn default() -> Self {
        Self {
            max_memory_size: 1_000,
            memory_ttl: Duration::from_secs(300),
            distributed_ttl: Duration::from_secs(3_600),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            key_prefix: "pubkey:".to_string(),
        }
    }
}

impl PublicKeyCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero(PUBLIC_KEY_CACHE_MAX_MEMORY_SIZE_ENV, self.max_memory_size)?;
        bounded_duration(PUBLIC_KEY_CACHE_MEMORY_TTL_ENV, self.memory_ttl)?;
        bounded_duration(PUBLIC_KEY_CACHE_DISTRIBUTED_TTL_ENV, self.distributed_ttl)?;
        bounded_duration("public key cache sweep interval", self.sweep_interval)
    }
}

/// OTP issuance and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpServiceConfig {
    pub otp_expiry: Duration,
    pub verified_token_expiry: Duration,
    pub max_attempts: u32,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// Cache plaintext codes in the distributed store and accept an exact
    /// match without touching the attempt counter
    pub fast_path: bool,
}

impl Default for OtpServiceConfig {
    fn default() -> Self {
        Self {
            otp_expiry: Duration::from_secs(300),
            verified_token_expiry: Duration::from_secs(900),
            max_attempts: 5,
            rate_limit_max: 3,
            rate_limit_window: Duration::from_secs(300),
            fast_path: true,
        }
    }
}

impl OtpServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        bounded_duration(OTP_EXPIRY_ENV, self.otp_expiry)?;
        bounded_duration(OTP_VERIFIED_TOKEN_EXPIRY_ENV, self.verified_token_expiry)?;
        non_zero(OTP_MAX_ATTEMPTS_ENV, self.max_attempts)?;
        non_zero(OTP_RATE_LIMIT_MAX_ENV, self.rate_limit_max)?;
        bounded_duration(OTP_RATE_LIMIT_WINDOW_ENV, self.rate_limit_window)
    }
}

/// Everything the authentication core needs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CoreConfig {
    pub environment: Environment,
    pub signature: SignatureConfig,
    pub nonce: NonceConfig,
    pub public_key_cache: PublicKeyCacheConfig,
    pub otp: OtpServiceConfig,
    pub private_key_encryption_secret: Option<String>,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("environment", &self.environment)
            .field("signature", &self.signature)
            .field("nonce", &self.nonce)
            .field("public_key_cache", &self.public_key_cache)
            .field("otp", &self.otp)
            .field(
                "private_key_encryption_secret",
                &self.private_key_encryption_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl CoreConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any name → value lookup. Unset or empty values take the
    /// default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let signature_defaults = SignatureConfig::default();
        let nonce_defaults = NonceConfig::default();
        let cache_defaults = PublicKeyCacheConfig::default();
        let otp_defaults = OtpServiceConfig::default();

        let config = Self {
            environment: match env.get(APP_ENV_ENV) {
                Some(value) => value.parse()?,
                None => Environment::default(),
            },
            signature: SignatureConfig {
                window: env.secs(SIGNATURE_WINDOW_ENV, signature_defaults.window)?,
            },
            nonce: NonceConfig {
                window: env.secs(NONCE_WINDOW_ENV, nonce_defaults.window)?,
                max_memory_size: env.number(NONCE_MAX_MEMORY_SIZE_ENV, nonce_defaults.max_memory_size)?,
                ..nonce_defaults
            },
            public_key_cache: PublicKeyCacheConfig {
                max_memory_size: env.number(
                    PUBLIC_KEY_CACHE_MAX_MEMORY_SIZE_ENV,
                    cache_defaults.max_memory_size,
                )?,
                memory_ttl: env.secs(PUBLIC_KEY_CACHE_MEMORY_TTL_ENV, cache_defaults.memory_ttl)?,
                distributed_ttl: env.secs(
                    PUBLIC_KEY_CACHE_DISTRIBUTED_TTL_ENV,
                    cache_defaults.distributed_ttl,
                )?,
                ..cache_defaults
            },
            otp: OtpServiceConfig {
                otp_expiry: env.secs(OTP_EXPIRY_ENV, otp_defaults.otp_expiry)?,
                verified_token_expiry: env.secs(
                    OTP_VERIFIED_TOKEN_EXPIRY_ENV,
                    otp_defaults.verified_token_expiry,
                )?,
                max_attempts: env.number(OTP_MAX_ATTEMPTS_ENV, otp_defaults.max_attempts)?,
                rate_limit_max: env.number(OTP_RATE_LIMIT_MAX_ENV, otp_defaults.rate_limit_max)?,
                rate_limit_window: env
                    .secs(OTP_RATE_LIMIT_WINDOW_ENV, otp_defaults.rate_limit_window)?,
                fast_path: env.boolean(OTP_FAST_PATH_ENV, otp_defaults.fast_path)?,
            },
            private_key_encryption_secret: env.get(PRIVATE_KEY_ENCRYPTION_SECRET_ENV),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signature.validate()?;
        self.nonce.validate()?;
        self.public_key_cache.validate()?;
        self.otp.validate()
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn number<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { name, value }),
            None => Ok(default),
        }
    }

    fn secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.number(name, default.as_secs()).map(Duration::from_secs)
    }

    fn boolean(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name) {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidBool { name, value }),
            },
            None => Ok(default),
        }
    }
}
