//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `VITRINA_BACKEND_URL` - Base URL of the backend API proxy
//! - `VITRINA_BASE_URL` - Public URL for the storefront
//!
//! ## Optional
//! - `VITRINA_HOST` - Bind address (default: 127.0.0.1)
//! - `VITRINA_PORT` - Listen port (default: 3000)
//! - `VITRINA_BACKEND_API_KEY` - Bearer token for the backend proxy
//! - `VITRINA_TAX_RATE` - VAT rate as a fraction (default: 0.15)
//! - `VITRINA_SHIPPING_COST` - Flat shipping cost in dollars (default: 0.00)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Trace sample rate (default: 0.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Backend API proxy configuration
    pub backend: BackendConfig,
    /// Read-only store rules (tax rate, shipping cost)
    pub rules: StoreRules,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate
    pub sentry_sample_rate: f32,
    /// Sentry trace sample rate
    pub sentry_traces_sample_rate: f32,
}

/// Backend API proxy configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct BackendConfig {
    /// Base URL of the backend API proxy (e.g. <https://api.example.com>)
    pub base_url: String,
    /// Optional bearer token for the backend proxy
    pub api_key: Option<SecretString>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Read-only store rules supplied by deployment configuration.
///
/// This is the configuration-provider collaborator: the cart store and the
/// checkout orchestrator receive it by value and never mutate it.
#[derive(Debug, Clone, Copy)]
pub struct StoreRules {
    /// VAT rate as a fraction in `[0, 1]` (e.g. 0.15 for 15%).
    pub tax_rate: Decimal,
    /// Flat shipping cost in dollars. Enters the payment amount at
    /// checkout, not the cart totals.
    pub shipping_cost: Decimal,
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the backend API key fails validation (placeholder detection,
    /// entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = get_env_or_default("VITRINA_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("VITRINA_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("VITRINA_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("VITRINA_PORT".to_string(), e.to_string()))?;
        let base_url = get_required_env("VITRINA_BASE_URL")?;

        let backend = BackendConfig::from_env()?;
        let rules = StoreRules::from_env()?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = parse_rate("SENTRY_SAMPLE_RATE", 1.0)?;
        let sentry_traces_sample_rate = parse_rate("SENTRY_TRACES_SAMPLE_RATE", 0.0)?;

        Ok(Self {
            host,
            port,
            base_url,
            backend,
            rules,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl BackendConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let base_url = get_required_env("VITRINA_BACKEND_URL")?;
        url::Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("VITRINA_BACKEND_URL".to_string(), e.to_string())
        })?;

        let api_key = match get_optional_env("VITRINA_BACKEND_API_KEY") {
            Some(value) => {
                validate_secret_strength(&value, "VITRINA_BACKEND_API_KEY")?;
                Some(SecretString::from(value))
            }
            None => None,
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

impl StoreRules {
    /// Validate and construct store rules.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the tax rate is outside
    /// `[0, 1]` or the shipping cost is negative.
    pub fn new(tax_rate: Decimal, shipping_cost: Decimal) -> Result<Self, ConfigError> {
        if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE {
            return Err(ConfigError::InvalidEnvVar(
                "VITRINA_TAX_RATE".to_string(),
                format!("must be between 0 and 1 (got {tax_rate})"),
            ));
        }

        if shipping_cost < Decimal::ZERO {
            return Err(ConfigError::InvalidEnvVar(
                "VITRINA_SHIPPING_COST".to_string(),
                format!("must not be negative (got {shipping_cost})"),
            ));
        }

        Ok(Self {
            tax_rate,
            shipping_cost,
        })
    }

    fn from_env() -> Result<Self, ConfigError> {
        Self::new(
            parse_decimal("VITRINA_TAX_RATE", "0.15")?,
            parse_decimal("VITRINA_SHIPPING_COST", "0.00")?,
        )
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a decimal environment variable with a default.
fn parse_decimal(key: &str, default: &str) -> Result<Decimal, ConfigError> {
    get_env_or_default(key, default)
        .parse::<Decimal>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a sample-rate environment variable with a default.
fn parse_rate(key: &str, default: f32) -> Result<f32, ConfigError> {
    match get_optional_env(key) {
        None => Ok(default),
        Some(value) => {
            let rate = value
                .parse::<f32>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
            if (0.0..=1.0).contains(&rate) {
                Ok(rate)
            } else {
                Err(ConfigError::InvalidEnvVar(
                    key.to_string(),
                    format!("must be between 0 and 1 (got {rate})"),
                ))
            }
        }
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real API keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated key."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_shannon_entropy_single_char() {
        // All same character = 0 entropy
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        // "ab" has entropy of 1 bit per char (50% a, 50% b)
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-api-key-here", "TEST_VAR");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InsecureSecret(_, _)
        ));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        // High-entropy random string
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_socket_addr() {
        let config = StorefrontConfig {
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            backend: BackendConfig {
                base_url: "http://localhost:4000".to_string(),
                api_key: None,
            },
            rules: StoreRules {
                tax_rate: dec!(0.15),
                shipping_cost: dec!(0.00),
            },
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
        };

        let addr = config.socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_store_rules_accepts_valid_values() {
        let rules = StoreRules::new(dec!(0.15), dec!(3.50)).unwrap();
        assert_eq!(rules.tax_rate, dec!(0.15));
        assert_eq!(rules.shipping_cost, dec!(3.50));

        // Boundary values are allowed
        assert!(StoreRules::new(dec!(0), dec!(0)).is_ok());
        assert!(StoreRules::new(dec!(1), dec!(0)).is_ok());
    }

    #[test]
    fn test_store_rules_rejects_tax_rate_out_of_range() {
        for rate in [dec!(-0.01), dec!(1.01), dec!(15)] {
            let err = StoreRules::new(rate, dec!(0)).unwrap_err();
            match err {
                ConfigError::InvalidEnvVar(var, message) => {
                    assert_eq!(var, "VITRINA_TAX_RATE");
                    assert!(message.contains("between 0 and 1"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_store_rules_rejects_negative_shipping_cost() {
        let err = StoreRules::new(dec!(0.15), dec!(-3.50)).unwrap_err();
        match err {
            ConfigError::InvalidEnvVar(var, message) => {
                assert_eq!(var, "VITRINA_SHIPPING_COST");
                assert!(message.contains("negative"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_backend_config_debug_redacts_api_key() {
        let config = BackendConfig {
            base_url: "http://localhost:4000".to_string(),
            api_key: Some(SecretString::from("super_secret_api_key_value")),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("localhost:4000"));
        assert!(debug_output.contains("REDACTED"));
        assert!(!debug_output.contains("super_secret_api_key_value"));
    }
}
