//! Authorization error types.
//!
//! Every failure in this crate is scoped to a single authorization attempt
//! or a single protected call. Two operations degrade gracefully instead of
//! failing: [`Authorization::ensure_fresh_tokens`] returns stale tokens when
//! a refresh fails, and [`ResponseSignatureVerifier::verify`] returns `false`
//! instead of an error.
//!
//! [`Authorization::ensure_fresh_tokens`]: crate::oauth::session::Authorization::ensure_fresh_tokens
//! [`ResponseSignatureVerifier::verify`]: crate::token::detached::ResponseSignatureVerifier::verify

use std::fmt;

use crate::config::ConfigError;
use crate::federation::jwks::KeyResolutionError;
use crate::token::jwt::SigningError;

/// Why an ID token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationFailure {
    /// The signature does not verify against the resolved key.
    BadSignature,
    /// `iss` differs from the expected issuer.
    IssuerMismatch,
    /// `aud` does not contain the client id.
    AudienceMismatch,
    /// `exp` is in the past, beyond the clock skew tolerance.
    Expired,
    /// `nonce` differs from the one issued with the flow.
    NonceMismatch,
    /// A `c_hash`, `s_hash`, `at_hash` or `rt_hash` claim does not match.
    HashMismatch,
    /// The header names an algorithm outside the allow-list.
    UnsupportedAlgorithm,
    /// The header carries no `kid`.
    MissingKeyId,
    /// The token cannot be parsed.
    Malformed,
}

impl AuthenticationFailure {
    /// Returns the reason as a stable snake_case string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadSignature => "bad_signature",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::Expired => "expired",
            Self::NonceMismatch => "nonce_mismatch",
            Self::HashMismatch => "hash_mismatch",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::MissingKeyId => "missing_key_id",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for AuthenticationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while authorizing against the bank.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The JWKS was fetched but contains no key with the requested id.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// The key id that was looked up.
        kid: String,
    },

    /// The JWKS endpoint is unreachable or returned an unusable document.
    #[error("Failed to fetch key set: {message}")]
    KeyFetch {
        /// Description of the fetch failure.
        message: String,
    },

    /// The ID token failed verification.
    #[error("Authentication failed ({reason}): {message}")]
    Authentication {
        /// Which verification step failed.
        reason: AuthenticationFailure,
        /// Detail for diagnostics.
        message: String,
    },

    /// The token endpoint answered with an error.
    #[error("Token endpoint error: status {http_status}: {body}")]
    TokenEndpoint {
        /// HTTP status code returned by the token endpoint.
        http_status: u16,
        /// Raw response body.
        body: String,
    },

    /// The identity provider redirected back with `error`.
    #[error("Authorization callback error: {code}")]
    OAuthCallback {
        /// The `error` parameter.
        code: String,
        /// The `error_description` parameter, if any.
        description: Option<String>,
    },

    /// The callback `state` does not match the pending authorization.
    #[error("State mismatch")]
    StateMismatch,

    /// The callback carried neither an error nor an authorization code.
    #[error("Authorization flow cancelled")]
    FlowCancelled,

    /// A domain call was made on an authorization without usable tokens.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The session holds no authorization.
    #[error("No session")]
    NoSession,

    /// A PSD2 API answered with a non-success status.
    #[error("API error: status {http_status}: {body}")]
    Api {
        /// HTTP status code.
        http_status: u16,
        /// Raw response body.
        body: String,
    },

    /// A signed API response could not be verified.
    #[error("Response integrity unconfirmed: {message}")]
    ResponseIntegrity {
        /// What was being verified.
        message: String,
    },

    /// A request or response could not be serialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the error.
        message: String,
    },

    /// Signing or key loading failed.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The network call failed before an HTTP status was received.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Authentication` error.
    #[must_use]
    pub fn authentication(reason: AuthenticationFailure, message: impl Into<String>) -> Self {
        Self::Authentication {
            reason,
            message: message.into(),
        }
    }

    /// Creates a new `TokenEndpoint` error.
    #[must_use]
    pub fn token_endpoint(http_status: u16, body: impl Into<String>) -> Self {
        Self::TokenEndpoint {
            http_status,
            body: body.into(),
        }
    }

    /// Creates a new `OAuthCallback` error.
    #[must_use]
    pub fn oauth_callback(code: impl Into<String>, description: Option<String>) -> Self {
        Self::OAuthCallback {
            code: code.into(),
            description,
        }
    }

    /// Creates a new `Api` error.
    #[must_use]
    pub fn api(http_status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            http_status,
            body: body.into(),
        }
    }

    /// Creates a new `ResponseIntegrity` error.
    #[must_use]
    pub fn response_integrity(message: impl Into<String>) -> Self {
        Self::ResponseIntegrity {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the verification sub-reason for `Authentication` errors.
    #[must_use]
    pub fn authentication_failure(&self) -> Option<AuthenticationFailure> {
        match self {
            Self::Authentication { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Returns `true` if the user has to restart the authorization flow.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Authentication | ErrorCategory::TokenExpired | ErrorCategory::Revoked
        )
    }

    /// Returns the error category so callers can pick recovery guidance.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication { .. } | Self::StateMismatch | Self::FlowCancelled => {
                ErrorCategory::Authentication
            }
            Self::OAuthCallback { code, .. } if code == "access_denied" => ErrorCategory::Revoked,
            Self::OAuthCallback { .. } => ErrorCategory::Upstream,
            Self::NotAuthenticated | Self::NoSession => ErrorCategory::TokenExpired,
            Self::TokenEndpoint { http_status, body } => {
                if *http_status == 400 && body.contains("invalid_grant") {
                    ErrorCategory::Revoked
                } else {
                    ErrorCategory::Upstream
                }
            }
            Self::Api { http_status, .. } if *http_status == 401 => ErrorCategory::TokenExpired,
            Self::Api { http_status, .. } if *http_status == 403 => ErrorCategory::Revoked,
            Self::Api { .. } | Self::ResponseIntegrity { .. } | Self::Network { .. } => {
                ErrorCategory::Upstream
            }
            Self::KeyNotFound { .. } | Self::KeyFetch { .. } => ErrorCategory::KeyResolution,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Signing(_) | Self::Serialization { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<KeyResolutionError> for AuthError {
    fn from(err: KeyResolutionError) -> Self {
        match err {
            KeyResolutionError::KeyNotFound(kid) => Self::KeyNotFound { kid },
            other => Self::KeyFetch {
                message: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Categories of authorization errors, matching the recovery guidance a
/// view layer offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad state, hash or signature. The flow must be restarted.
    Authentication,
    /// Tokens are missing or expired. The user must sign in again.
    TokenExpired,
    /// The user or the bank withdrew the authorization.
    Revoked,
    /// The JWKS could not be used.
    KeyResolution,
    /// The bank's endpoints failed or answered with an error.
    Upstream,
    /// Invalid configuration.
    Configuration,
    /// Local failure such as signing or serialization.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::TokenExpired => write!(f, "token_expired"),
            Self::Revoked => write!(f, "revoked"),
            Self::KeyResolution => write!(f, "key_resolution"),
            Self::Upstream => write!(f, "upstream"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
