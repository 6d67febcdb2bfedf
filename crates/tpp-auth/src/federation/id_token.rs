//! ID token verification.
//!
//! [`IdTokenVerifier::verify`] runs one verification pass:
//!
//! 1. Parse the header; the algorithm must be ES256, RS256 or PS256 and a
//!    `kid` must be present.
//! 2. Resolve the key from the identity provider's JWKS.
//! 3. Check the signature, `iss`, `aud`, `exp` (with clock skew) and, when
//!    the caller supplies one, `nonce`.
//! 4. Check the hash bindings. Every `c_hash`, `s_hash`, `at_hash` and
//!    `rt_hash` claim present in the token is compared with the value the
//!    call site supplies (a value the call site does not supply hashes as
//!    the empty string, so it can only mismatch). Absent claims are skipped.
//!
//! Every failure is an [`AuthError::Authentication`] with an
//! [`AuthenticationFailure`] reason, except key resolution failures which
//! keep their own variants. Nothing is retried.

use std::collections::HashMap;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Validation, decode_header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::AuthResult;
use crate::config::{AuthConfig, ConfigError, parse_url};
use crate::error::{AuthError, AuthenticationFailure};
use crate::federation::jwks::KeyResolver;
use crate::token::jwt::SigningAlgorithm;

/// Claims of a bank-issued ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer identifier.
    pub iss: String,

    /// Subject identifier.
    #[serde(default)]
    pub sub: String,

    /// Audience (string or array).
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at time (Unix timestamp).
    #[serde(default)]
    pub iat: i64,

    /// Nonce echoed from the request object.
    pub nonce: Option<String>,

    /// Authentication context class reference.
    pub acr: Option<String>,

    /// Authorization id the user consented to.
    #[serde(rename = "authorizationId")]
    pub authorization_id: Option<String>,

    /// Code hash.
    pub c_hash: Option<String>,

    /// State hash.
    pub s_hash: Option<String>,

    /// Access token hash.
    pub at_hash: Option<String>,

    /// Refresh token hash.
    pub rt_hash: Option<String>,

    /// Extra claims not defined in the struct.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

/// Values the hash claims are checked against at a given call site.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashBinding<'a> {
    /// Authorization code (`c_hash`).
    pub code: Option<&'a str>,
    /// OAuth state (`s_hash`).
    pub state: Option<&'a str>,
    /// Access token (`at_hash`).
    pub access_token: Option<&'a str>,
    /// Refresh token (`rt_hash`).
    pub refresh_token: Option<&'a str>,
}

impl<'a> HashBinding<'a> {
    /// Binding for the ID token returned on the redirect.
    #[must_use]
    pub fn code_and_state(code: &'a str, state: &'a str) -> Self {
        Self {
            code: Some(code),
            state: Some(state),
            ..Self::default()
        }
    }

    /// Binding for the ID token returned by the token endpoint.
    #[must_use]
    pub fn tokens(access_token: &'a str, refresh_token: Option<&'a str>) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token,
            ..Self::default()
        }
    }
}

/// `base64url(left half of SHA-256(value))`, the OIDC hash-claim encoding.
#[must_use]
pub fn left_half_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

/// Compares every present hash claim with its bound value.
pub(crate) fn check_hash_binding(
    claims: &IdTokenClaims,
    binding: &HashBinding<'_>,
) -> Result<(), AuthError> {
    let pairs = [
        ("c_hash", claims.c_hash.as_deref(), binding.code),
        ("s_hash", claims.s_hash.as_deref(), binding.state),
        ("at_hash", claims.at_hash.as_deref(), binding.access_token),
        ("rt_hash", claims.rt_hash.as_deref(), binding.refresh_token),
    ];

    for (name, claim, value) in pairs {
        let Some(expected) = claim else {
            tracing::debug!(claim = name, "hash claim absent, binding skipped");
            continue;
        };
        if left_half_hash(value.unwrap_or_default()) != expected {
            return Err(AuthError::authentication(
                AuthenticationFailure::HashMismatch,
                format!("{name} does not match"),
            ));
        }
    }
    Ok(())
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> AuthError {
    let reason = match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidKeyFormat => AuthenticationFailure::BadSignature,
        ErrorKind::ExpiredSignature => AuthenticationFailure::Expired,
        ErrorKind::InvalidIssuer => AuthenticationFailure::IssuerMismatch,
        ErrorKind::InvalidAudience => AuthenticationFailure::AudienceMismatch,
        ErrorKind::InvalidAlgorithm => AuthenticationFailure::UnsupportedAlgorithm,
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "iss" => AuthenticationFailure::IssuerMismatch,
            "aud" => AuthenticationFailure::AudienceMismatch,
            _ => AuthenticationFailure::Malformed,
        },
        _ => AuthenticationFailure::Malformed,
    };
    AuthError::authentication(reason, err.to_string())
}

/// Verifies ID tokens issued by the bank's identity provider.
#[derive(Clone)]
pub struct IdTokenVerifier {
    resolver: KeyResolver,
    jwks_uri: Url,
    issuer: String,
    client_id: String,
    clock_skew: Duration,
}

impl IdTokenVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(
        resolver: KeyResolver,
        jwks_uri: Url,
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        clock_skew: Duration,
    ) -> Self {
        Self {
            resolver,
            jwks_uri,
            issuer: issuer.into(),
            client_id: client_id.into(),
            clock_skew,
        }
    }

    /// Creates a verifier for the configured identity provider.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the JWKS URL or issuer cannot be derived.
    pub fn from_config(resolver: KeyResolver, config: &AuthConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            resolver,
            parse_url("oidc.jwks_url", &config.oidc.jwks_url)?,
            config.expected_issuer()?,
            config.oidc.client_id.clone(),
            config.clock_skew,
        ))
    }

    /// Returns the issuer tokens must carry.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verifies `id_token`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` with the failed step as reason,
    /// or `AuthError::KeyNotFound` / `AuthError::KeyFetch` if the key cannot
    /// be resolved.
    pub async fn verify(
        &self,
        id_token: &str,
        expected_nonce: Option<&str>,
        binding: HashBinding<'_>,
    ) -> AuthResult<IdTokenClaims> {
        let header = decode_header(id_token).map_err(|e| {
            AuthError::authentication(AuthenticationFailure::Malformed, e.to_string())
        })?;

        if SigningAlgorithm::from_jwt_algorithm(header.alg).is_none() {
            return Err(AuthError::authentication(
                AuthenticationFailure::UnsupportedAlgorithm,
                format!("{:?} is not accepted", header.alg),
            ));
        }

        let kid = header.kid.ok_or_else(|| {
            AuthError::authentication(AuthenticationFailure::MissingKeyId, "header has no kid")
        })?;

        let resolved = self.resolver.resolve_key(&self.jwks_uri, &kid).await?;
        if let Some(declared) = resolved.algorithm
            && declared != header.alg
        {
            return Err(AuthError::authentication(
                AuthenticationFailure::BadSignature,
                format!("key {kid} is bound to {declared:?}"),
            ));
        }

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.clock_skew.as_secs();

        let claims = jsonwebtoken::decode::<IdTokenClaims>(id_token, &resolved.key, &validation)
            .map_err(map_decode_error)?
            .claims;

        if let Some(expected) = expected_nonce
            && claims.nonce.as_deref() != Some(expected)
        {
            return Err(AuthError::authentication(
                AuthenticationFailure::NonceMismatch,
                "nonce does not match the pending flow",
            ));
        }

        check_hash_binding(&claims, &binding)?;

        tracing::debug!(
            kid = %kid,
            authorization_id = claims.authorization_id.as_deref().unwrap_or_default(),
            "ID token verified"
        );
        Ok(claims)
    }
}
