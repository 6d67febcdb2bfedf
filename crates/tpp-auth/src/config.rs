//! Relying-party configuration.
//!
//! [`AuthConfig`] is constructed once (usually through
//! [`loader::load_config`]) and handed to every component at construction.
//! Nothing in this crate reads configuration from globals.
//!
//! # Example (TOML)
//!
//! ```toml
//! environment = "sandbox"
//!
//! [oidc]
//! authorize_url = "https://sandbox.bank.example/oauth/authorize"
//! token_url = "https://sandbox.bank.example/oauth/token"
//! jwks_url = "https://sandbox.bank.example/oauth/jwks"
//! client_id = "tpp-client"
//! client_secret = "secret"
//!
//! [signing]
//! kid = "tpp-signing-1"
//! key_path = "/etc/tpp/signing.pem"
//!
//! [timeouts]
//! jwks_fetch = "5s"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::oauth::session::AuthorizationType;
use crate::token::jwt::SigningAlgorithm;

/// Deployment profile. Selects the default signing algorithm and whether
/// the client certificate is echoed in API headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Bank sandbox: ES256 signing, `x-client-certificate` header.
    #[default]
    Sandbox,
    /// Production-public: RS256 signing.
    Production,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Deployment profile.
    pub environment: Environment,

    /// Identity provider endpoints and client registration.
    pub oidc: OidcConfig,

    /// Redirect URIs registered per authorization type.
    pub callbacks: CallbackConfig,

    /// Request-object and detached-JWS signing key.
    pub signing: SigningConfig,

    /// Client certificate for mutual TLS.
    pub mtls: Option<MtlsConfig>,

    /// PSD2 API endpoints.
    pub apis: ApiConfig,

    /// Network timeouts.
    pub timeouts: TimeoutConfig,

    /// Tolerance applied to `exp` when verifying ID tokens.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Subtracted from `expires_in` so refresh happens before real expiry.
    #[serde(with = "humantime_serde")]
    pub token_expiry_buffer: Duration,

    /// Log output.
    pub logging: LoggingConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            oidc: OidcConfig::default(),
            callbacks: CallbackConfig::default(),
            signing: SigningConfig::default(),
            mtls: None,
            apis: ApiConfig::default(),
            timeouts: TimeoutConfig::default(),
            clock_skew: Duration::from_secs(120),
            token_expiry_buffer: Duration::from_secs(120),
            logging: LoggingConfig::default(),
        }
    }
}

/// Identity provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OidcConfig {
    /// Authorization endpoint the browser is redirected to.
    pub authorize_url: String,

    /// Token endpoint (mutual TLS).
    pub token_url: String,

    /// JWKS used to verify ID tokens.
    pub jwks_url: String,

    /// Expected `iss`. Defaults to the origin of `authorize_url`.
    pub issuer: Option<String>,

    /// `aud` of signed request objects. Defaults to the expected issuer.
    pub request_audience: Option<String>,

    /// Registered client id.
    pub client_id: String,

    /// Registered client secret.
    pub client_secret: String,
}

/// Redirect URIs per authorization type.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CallbackConfig {
    /// Account information callback.
    pub accounts: String,
    /// Payment initiation callback.
    pub payments: String,
    /// Confirmation of funds callback.
    pub funds_confirmation: String,
}

impl CallbackConfig {
    /// Returns the redirect URI registered for an authorization type.
    #[must_use]
    pub fn for_type(&self, authorization_type: &AuthorizationType) -> &str {
        match authorization_type {
            AuthorizationType::Accounts => &self.accounts,
            AuthorizationType::Payments => &self.payments,
            AuthorizationType::FundsConfirmation { .. } => &self.funds_confirmation,
        }
    }
}

/// Signing key configuration.
///
/// Exactly one of `key_path` and `key_pem` must be set.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SigningConfig {
    /// Explicit algorithm. Defaults per [`Environment`].
    pub algorithm: Option<SigningAlgorithm>,

    /// Key id placed in every JWS header.
    pub kid: String,

    /// Path to the private key PEM.
    pub key_path: Option<PathBuf>,

    /// Inline private key PEM.
    pub key_pem: Option<String>,

    /// Passphrase for an encrypted PKCS#8 key.
    pub passphrase: Option<String>,
}

/// Client certificate for the token endpoint and PSD2 APIs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MtlsConfig {
    /// Certificate chain PEM.
    pub certificate_path: PathBuf,

    /// Private key PEM.
    pub private_key_path: PathBuf,

    /// Passphrase for an encrypted PKCS#8 key.
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// PSD2 API endpoints.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ApiConfig {
    /// Account information API base URL.
    pub accounts_url: String,
    /// Payment initiation API base URL.
    pub payments_url: String,
    /// Confirmation of funds API base URL.
    pub funds_confirmation_url: String,
    /// JWKS used to verify signed payment responses.
    pub payments_jwks_url: String,
    /// `x-api-key` sent on every call.
    pub api_key: String,
}

/// Network timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// JWKS fetch.
    #[serde(with = "humantime_serde")]
    pub jwks_fetch: Duration,
    /// Token endpoint calls.
    #[serde(with = "humantime_serde")]
    pub token_request: Duration,
    /// PSD2 API calls.
    #[serde(with = "humantime_serde")]
    pub api_request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            jwks_fetch: Duration::from_secs(5),
            token_request: Duration::from_secs(10),
            api_request: Duration::from_secs(10),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for empty required values and
    /// `ConfigError::InvalidValue` for unparsable URLs or inconsistent
    /// settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        required_url("oidc.authorize_url", &self.oidc.authorize_url)?;
        required_url("oidc.token_url", &self.oidc.token_url)?;
        required_url("oidc.jwks_url", &self.oidc.jwks_url)?;
        required("oidc.client_id", &self.oidc.client_id)?;
        required("oidc.client_secret", &self.oidc.client_secret)?;
        required("signing.kid", &self.signing.kid)?;

        match (&self.signing.key_path, &self.signing.key_pem) {
            (None, None) => {
                return Err(ConfigError::Missing(
                    "signing.key_path or signing.key_pem".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidValue(
                    "signing.key_path and signing.key_pem are mutually exclusive".to_string(),
                ));
            }
            _ => {}
        }

        for (name, value) in [
            ("callbacks.accounts", &self.callbacks.accounts),
            ("callbacks.payments", &self.callbacks.payments),
            ("callbacks.funds_confirmation", &self.callbacks.funds_confirmation),
            ("apis.accounts_url", &self.apis.accounts_url),
            ("apis.payments_url", &self.apis.payments_url),
            ("apis.funds_confirmation_url", &self.apis.funds_confirmation_url),
            ("apis.payments_jwks_url", &self.apis.payments_jwks_url),
        ] {
            if !value.is_empty() {
                parse_url(name, value)?;
            }
        }

        if let Some(issuer) = &self.oidc.issuer {
            required("oidc.issuer", issuer)?;
        }

        if self.timeouts.jwks_fetch.is_zero() || self.timeouts.token_request.is_zero() {
            return Err(ConfigError::InvalidValue(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the signing algorithm: the explicit setting, else ES256 in
    /// sandbox and RS256 in production.
    #[must_use]
    pub fn signing_algorithm(&self) -> SigningAlgorithm {
        self.signing.algorithm.unwrap_or(match self.environment {
            Environment::Sandbox => SigningAlgorithm::ES256,
            Environment::Production => SigningAlgorithm::RS256,
        })
    }

    /// Returns the issuer ID tokens must carry.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if no issuer is configured and the
    /// authorize URL cannot be parsed.
    pub fn expected_issuer(&self) -> Result<String, ConfigError> {
        if let Some(issuer) = &self.oidc.issuer {
            return Ok(issuer.clone());
        }
        let url = parse_url("oidc.authorize_url", &self.oidc.authorize_url)?;
        Ok(url.origin().ascii_serialization())
    }

    /// Returns the `aud` of signed request objects.
    ///
    /// # Errors
    ///
    /// Same as [`expected_issuer`](Self::expected_issuer).
    pub fn request_audience(&self) -> Result<String, ConfigError> {
        match &self.oidc.request_audience {
            Some(aud) => Ok(aud.clone()),
            None => self.expected_issuer(),
        }
    }

    /// Returns `true` for the sandbox profile.
    #[must_use]
    pub fn is_sandbox(&self) -> bool {
        self.environment == Environment::Sandbox
    }
}

fn required(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name.to_string()));
    }
    Ok(())
}

fn required_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    required(name, value)?;
    parse_url(name, value)
}

/// Parses a configured URL, naming the setting in the error.
pub(crate) fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue(format!("{name}: {e}")))
}

pub mod loader {
    //! Layered loading: TOML file, then `TPP__SECTION__KEY` environment
    //! overrides.

    use std::path::{Path, PathBuf};

    use config::{Config, Environment, File};

    use super::{AuthConfig, ConfigError};

    /// Default file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "tpp-auth.toml";

    /// Loads and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be read or
    /// deserialized, and the validation error otherwise.
    pub fn load_config(path: Option<&Path>) -> Result<AuthConfig, ConfigError> {
        let mut builder = Config::builder();
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        // e.g. TPP__OIDC__CLIENT_ID=abc
        builder = builder.add_source(
            Environment::with_prefix("TPP")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: AuthConfig = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        tracing::debug!(environment = ?merged.environment, "configuration loaded");
        Ok(merged)
    }
}
