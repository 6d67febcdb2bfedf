//! Detached JWS (`header..signature`) for request and response bodies.
//!
//! Outbound bodies are signed with [`KeySigner::sign_detached`]; inbound
//! payment and account responses are checked with
//! [`ResponseSignatureVerifier`].
//!
//! [`ResponseSignatureVerifier::verify`] returns `bool` and never errors.
//! `false` means "integrity unconfirmed": the caller must reject the data.
//! This differs from ID-token verification, which raises typed errors.
//!
//! [`KeySigner::sign_detached`]: crate::token::jwt::KeySigner::sign_detached

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use url::Url;

use crate::config::{AuthConfig, ConfigError, parse_url};
use crate::federation::jwks::KeyResolver;
use crate::token::jwt::SigningAlgorithm;

/// HTTP header carrying a detached JWS.
pub const JWS_SIGNATURE_HEADER: &str = "x-jws-signature";

/// A compact JWS with an empty payload segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedJws(String);

impl DetachedJws {
    pub(crate) fn from_parts(header: &str, signature: &str) -> Self {
        Self(format!("{header}..{signature}"))
    }

    /// Wraps a received header value without validating it.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the `header..signature` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits into the encoded header and signature.
    ///
    /// Returns `None` unless there are exactly three segments with an empty
    /// middle one.
    #[must_use]
    pub fn parts(&self) -> Option<(&str, &str)> {
        let mut segments = self.0.split('.');
        let header = segments.next()?;
        let payload = segments.next()?;
        let signature = segments.next()?;
        if segments.next().is_some() || !payload.is_empty() {
            return None;
        }
        if header.is_empty() || signature.is_empty() {
            return None;
        }
        Some((header, signature))
    }

    /// Rebuilds the compact JWS by inserting `base64url(body)`.
    #[must_use]
    pub fn attach(&self, body: &[u8]) -> Option<String> {
        let (header, signature) = self.parts()?;
        Some(format!(
            "{header}.{}.{signature}",
            URL_SAFE_NO_PAD.encode(body)
        ))
    }
}

impl fmt::Display for DetachedJws {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Verifies detached signatures on API responses against a JWKS.
#[derive(Clone)]
pub struct ResponseSignatureVerifier {
    resolver: KeyResolver,
    jwks_uri: Url,
}

impl ResponseSignatureVerifier {
    /// Creates a verifier resolving keys from `jwks_uri`.
    #[must_use]
    pub fn new(resolver: KeyResolver, jwks_uri: Url) -> Self {
        Self { resolver, jwks_uri }
    }

    /// Creates a verifier for the configured payments JWKS.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the payments JWKS URL is missing or invalid.
    pub fn from_config(resolver: KeyResolver, config: &AuthConfig) -> Result<Self, ConfigError> {
        if config.apis.payments_jwks_url.is_empty() {
            return Err(ConfigError::Missing("apis.payments_jwks_url".to_string()));
        }
        let jwks_uri = parse_url("apis.payments_jwks_url", &config.apis.payments_jwks_url)?;
        Ok(Self::new(resolver, jwks_uri))
    }

    /// Checks `detached` against the exact bytes of `raw_body`.
    ///
    /// Returns `false` on any failure: malformed header, algorithm outside
    /// the allow-list, missing `kid`, unresolvable key or bad signature.
    pub async fn verify(&self, detached: &str, raw_body: &[u8]) -> bool {
        match self.check(&DetachedJws::new(detached), raw_body).await {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(jwks_uri = %self.jwks_uri, reason = %reason, "response signature rejected");
                false
            }
        }
    }

    async fn check(&self, detached: &DetachedJws, raw_body: &[u8]) -> Result<(), String> {
        let (_, signature) = detached
            .parts()
            .ok_or_else(|| "malformed detached JWS".to_string())?;
        let compact = detached
            .attach(raw_body)
            .ok_or_else(|| "malformed detached JWS".to_string())?;
        let header = jsonwebtoken::decode_header(&compact).map_err(|e| e.to_string())?;

        let algorithm = SigningAlgorithm::from_jwt_algorithm(header.alg)
            .ok_or_else(|| format!("algorithm {:?} not allowed", header.alg))?;
        let kid = header.kid.ok_or_else(|| "missing kid".to_string())?;

        let resolved = self
            .resolver
            .resolve_key(&self.jwks_uri, &kid)
            .await
            .map_err(|e| e.to_string())?;
        if let Some(declared) = resolved.algorithm
            && declared != header.alg
        {
            return Err(format!("key {kid} is bound to {declared:?}"));
        }

        let signing_input = compact
            .rsplit_once('.')
            .map(|(input, _)| input)
            .ok_or_else(|| "malformed detached JWS".to_string())?;

        match jsonwebtoken::crypto::verify(
            signature,
            signing_input.as_bytes(),
            &resolved.key,
            algorithm.to_jwt_algorithm(),
        ) {
            Ok(true) => Ok(()),
            Ok(false) => Err("signature mismatch".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}
