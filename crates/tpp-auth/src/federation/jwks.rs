//! Remote key set resolution.
//!
//! [`KeyResolver`] fetches JSON Web Key Sets from the bank's endpoints (the
//! ID-token JWKS and the payment-signing JWKS) and resolves verification
//! keys by `kid`.
//!
//! # Caching
//!
//! Sets are fetched on demand per distinct URI and reused until their TTL
//! passes. The TTL comes from `Cache-Control: max-age` bounded by the
//! configured limits; `no-store`/`no-cache` means the set is refetched on
//! every resolution. A `kid` missing from a cached set triggers exactly one
//! refetch inside the same call. Misses are never cached.
//!
//! The cache lock is never held while a fetch is in flight, so concurrent
//! resolutions for the same URI may fetch redundantly; the last writer wins.
//!
//! # Example
//!
//! ```ignore
//! let resolver = KeyResolver::new(KeyResolverConfig::default())?;
//! let jwks_uri = Url::parse("https://bank.example/oauth/jwks")?;
//! let resolved = resolver.resolve_key(&jwks_uri, "sig-2024").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use url::Url;

use crate::config::AuthConfig;

/// Configuration for [`KeyResolver`].
#[derive(Debug, Clone)]
pub struct KeyResolverConfig {
    /// TTL when the response has no Cache-Control max-age (default: 5 minutes).
    pub default_ttl: Duration,

    /// Upper bound for any TTL (default: 1 hour).
    pub max_ttl: Duration,

    /// Fetch timeout (default: 5 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether plain HTTP JWKS URIs are accepted. Testing only.
    pub allow_http: bool,
}

impl Default for KeyResolverConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(5),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl KeyResolverConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the maximum TTL.
    #[must_use]
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Sets the fetch timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Allows plain HTTP JWKS URIs.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Errors that can occur while resolving a key.
#[derive(Debug, thiserror::Error)]
pub enum KeyResolutionError {
    /// The request failed or timed out.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The endpoint returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The response is not a JWKS document.
    #[error("Failed to parse JWKS: {0}")]
    ParseError(String),

    /// No key with the requested id, even after a fresh fetch.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The key exists but cannot be used for verification.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The JWKS URI scheme is not allowed.
    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// The response exceeded the size limit.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

/// A verification key and the algorithm its JWK declares, if any.
#[derive(Clone)]
pub struct ResolvedKey {
    /// Key usable with `jsonwebtoken`.
    pub key: DecodingKey,
    /// The JWK `alg`, when present.
    pub algorithm: Option<Algorithm>,
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

struct RemoteKeySet {
    jwks: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl RemoteKeySet {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Fetches and caches remote key sets.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct KeyResolver {
    http_client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, RemoteKeySet>>>,
    config: KeyResolverConfig,
}

impl KeyResolver {
    /// Creates a resolver.
    ///
    /// # Errors
    ///
    /// Returns `KeyResolutionError::NetworkError` if the HTTP client cannot
    /// be built.
    pub fn new(config: KeyResolverConfig) -> Result<Self, KeyResolutionError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KeyResolutionError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            config,
        })
    }

    /// Creates a resolver with the configured fetch timeout.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_config(config: &AuthConfig) -> Result<Self, KeyResolutionError> {
        Self::new(KeyResolverConfig::default().with_request_timeout(config.timeouts.jwks_fetch))
    }

    /// Resolves the key with id `kid` from the set at `jwks_uri`.
    ///
    /// # Errors
    ///
    /// Returns `KeyResolutionError::KeyNotFound` if the freshly fetched set
    /// has no such key, and a fetch error if the set cannot be retrieved.
    pub async fn resolve_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Result<ResolvedKey, KeyResolutionError> {
        if let Some(resolved) = self.cached_key(jwks_uri, kid).await? {
            tracing::trace!(kid, %jwks_uri, "JWKS cache hit");
            return Ok(resolved);
        }

        tracing::debug!(kid, %jwks_uri, "JWKS cache miss");
        let jwks = self.refresh(jwks_uri).await?;

        match find_key(&jwks, kid)? {
            Some(resolved) => Ok(resolved),
            None => {
                tracing::warn!(kid, %jwks_uri, "key id not present in fetched JWKS");
                Err(KeyResolutionError::KeyNotFound(kid.to_string()))
            }
        }
    }

    async fn cached_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Result<Option<ResolvedKey>, KeyResolutionError> {
        let cache = self.cache.read().await;
        match cache.get(&normalize_uri(jwks_uri)) {
            Some(cached) if cached.is_fresh() => find_key(&cached.jwks, kid),
            _ => Ok(None),
        }
    }

    /// Fetches the set at `jwks_uri` and replaces the cached copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme is not allowed, the request fails or
    /// the response is not a JWKS document.
    pub async fn refresh(&self, jwks_uri: &Url) -> Result<JwkSet, KeyResolutionError> {
        self.validate_scheme(jwks_uri)?;

        tracing::debug!(%jwks_uri, "fetching JWKS");

        let response = self
            .http_client
            .get(jwks_uri.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(%jwks_uri, error = %e, "failed to fetch JWKS");
                KeyResolutionError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::warn!(%jwks_uri, status = response.status().as_u16(), "JWKS endpoint error");
            return Err(KeyResolutionError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(KeyResolutionError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let ttl = self.parse_cache_control(response.headers());

        let body = response
            .bytes()
            .await
            .map_err(|e| KeyResolutionError::NetworkError(e.to_string()))?;
        if body.len() > self.config.max_response_size {
            return Err(KeyResolutionError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(%jwks_uri, error = %e, "failed to parse JWKS");
            KeyResolutionError::ParseError(e.to_string())
        })?;

        tracing::debug!(%jwks_uri, keys = jwks.keys.len(), ttl = ?ttl, "JWKS fetched");

        let mut cache = self.cache.write().await;
        cache.insert(
            normalize_uri(jwks_uri),
            RemoteKeySet {
                jwks: jwks.clone(),
                fetched_at: Instant::now(),
                ttl,
            },
        );

        Ok(jwks)
    }

    fn validate_scheme(&self, uri: &Url) -> Result<(), KeyResolutionError> {
        match uri.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            _ => Err(KeyResolutionError::InvalidScheme),
        }
    }

    /// Derives the TTL from `Cache-Control`, bounded by `max_ttl`.
    fn parse_cache_control(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let Some(value) = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
        else {
            return self.config.default_ttl.min(self.config.max_ttl);
        };

        let mut max_age = None;
        for directive in value.split(',').map(str::trim) {
            if directive.eq_ignore_ascii_case("no-store") || directive.eq_ignore_ascii_case("no-cache")
            {
                return Duration::ZERO;
            }
            if let Some(seconds) = directive.strip_prefix("max-age=") {
                max_age = seconds.parse::<u64>().ok().map(Duration::from_secs);
            }
        }

        max_age
            .unwrap_or(self.config.default_ttl)
            .min(self.config.max_ttl)
    }

    /// Drops the cached set for `jwks_uri`.
    pub async fn invalidate(&self, jwks_uri: &Url) {
        self.cache.write().await.remove(&normalize_uri(jwks_uri));
        tracing::debug!(%jwks_uri, "invalidated JWKS cache entry");
    }

    /// Drops every cached set.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Returns the number of cached sets.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Returns `true` if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

/// Looks up a signing key by id. Encryption keys are skipped.
fn find_key(jwks: &JwkSet, kid: &str) -> Result<Option<ResolvedKey>, KeyResolutionError> {
    let Some(jwk) = jwks.keys.iter().find(|k| {
        k.common.key_id.as_deref() == Some(kid)
            && !matches!(k.common.public_key_use, Some(PublicKeyUse::Encryption))
    }) else {
        return Ok(None);
    };

    let key = DecodingKey::from_jwk(jwk)
        .map_err(|e| KeyResolutionError::InvalidKey(format!("{kid}: {e}")))?;
    Ok(Some(ResolvedKey {
        key,
        algorithm: jwk_algorithm(jwk),
    }))
}

fn normalize_uri(uri: &Url) -> String {
    uri.as_str().trim_end_matches('/').to_string()
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}
