//! Token endpoint client.
//!
//! Supports the three grants the relying party uses: `client_credentials`
//! (before a user authorization exists), `authorization_code` (after the
//! hybrid-flow callback) and `refresh_token`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::{AuthConfig, parse_url};
use crate::error::AuthError;
use crate::oauth::mtls;

/// A token set as stored on an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token, if the grant returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// ID token. Dropped once verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Usually `Bearer`.
    pub token_type: String,
    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Lifetime reported by the endpoint, in seconds.
    pub expires_in: u64,
    /// Receipt time plus `expires_in`, minus the expiry buffer.
    #[serde(with = "time::serde::rfc3339")]
    pub expiration_date: OffsetDateTime,
}

impl Tokens {
    /// Returns `true` once `expiration_date` has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Returns `true` if the tokens are expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expiration_date
    }

    /// Returns the tokens without the ID token.
    #[must_use]
    pub fn without_id_token(mut self) -> Self {
        self.id_token = None;
        self
    }
}

/// Wire format of a token endpoint response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    /// Access token. Absent on some refresh responses.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Token type.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// ID token.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// OAuth error code. Some endpoints answer 200 with an error body.
    #[serde(default)]
    pub error: Option<String>,
    /// OAuth error description.
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenResponse {
    /// Converts into [`Tokens`] received at `received_at`.
    ///
    /// Returns `None` if the response carries no access token.
    #[must_use]
    pub fn into_tokens(self, received_at: OffsetDateTime, expiry_buffer: Duration) -> Option<Tokens> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let expires_in = self.expires_in.unwrap_or_default();
        Some(Tokens {
            access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: self.scope,
            expires_in,
            expiration_date: received_at + Duration::from_secs(expires_in) - expiry_buffer,
        })
    }
}

/// The grants an authorization needs. Implemented by [`TokenClient`];
/// tests substitute their own implementation.
#[async_trait]
pub trait TokenGrants: Send + Sync {
    /// `client_credentials` grant for `scope`.
    async fn client_credentials(&self, scope: &str) -> AuthResult<Tokens>;

    /// `authorization_code` grant.
    async fn authorization_code(&self, code: &str, redirect_uri: &str) -> AuthResult<Tokens>;

    /// `refresh_token` grant.
    ///
    /// If the response carries no access token, `tokens` is returned
    /// unchanged. A missing refresh token in the response keeps the old one.
    async fn refresh_token(&self, tokens: &Tokens) -> AuthResult<Tokens>;
}

/// HTTP client for the bank's token endpoint.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    api_key: String,
    expiry_buffer: Duration,
}

impl TokenClient {
    /// Creates a client with the configured client certificate.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the token URL is invalid or the
    /// client certificate cannot be loaded.
    pub fn new(config: &AuthConfig) -> AuthResult<Self> {
        let http = mtls::build_http_client(config, config.timeouts.token_request)?;
        Self::with_http_client(http, config)
    }

    /// Creates a client on top of an existing `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the token URL is invalid.
    pub fn with_http_client(http: reqwest::Client, config: &AuthConfig) -> AuthResult<Self> {
        Ok(Self {
            http,
            token_url: parse_url("oidc.token_url", &config.oidc.token_url)?,
            client_id: config.oidc.client_id.clone(),
            client_secret: config.oidc.client_secret.clone(),
            api_key: config.apis.api_key.clone(),
            expiry_buffer: config.token_expiry_buffer,
        })
    }

    async fn request(&self, grant_type: &str, params: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 3);
        form.push(("grant_type", grant_type));
        form.extend_from_slice(params);
        form.push(("client_id", &self.client_id));
        form.push(("client_secret", &self.client_secret));

        let request_id = Uuid::new_v4().to_string();
        let response = self
            .http
            .post(self.token_url.clone())
            .header("Accept", "application/json")
            .header("x-api-key", &self.api_key)
            .header("x-request-id", &request_id)
            .header("x-session-id", Uuid::new_v4().to_string())
            .header("x-idempotency-key", Uuid::new_v4().to_string())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::warn!(grant_type, status = status.as_u16(), request_id = %request_id, "token request failed");
            return Err(AuthError::token_endpoint(status.as_u16(), body));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| AuthError::token_endpoint(status.as_u16(), body.clone()))?;
        if let Some(error) = &parsed.error {
            tracing::warn!(grant_type, error = %error, request_id = %request_id, "token endpoint returned an error body");
            return Err(AuthError::token_endpoint(status.as_u16(), body));
        }

        tracing::debug!(grant_type, request_id = %request_id, "token request succeeded");
        Ok(parsed)
    }

    fn require_tokens(&self, response: TokenResponse) -> AuthResult<Tokens> {
        response
            .into_tokens(OffsetDateTime::now_utc(), self.expiry_buffer)
            .ok_or_else(|| AuthError::token_endpoint(200, "response has no access_token"))
    }
}

#[async_trait]
impl TokenGrants for TokenClient {
    async fn client_credentials(&self, scope: &str) -> AuthResult<Tokens> {
        let response = self.request("client_credentials", &[("scope", scope)]).await?;
        self.require_tokens(response)
    }

    async fn authorization_code(&self, code: &str, redirect_uri: &str) -> AuthResult<Tokens> {
        let response = self
            .request(
                "authorization_code",
                &[("code", code), ("redirect_uri", redirect_uri)],
            )
            .await?;
        self.require_tokens(response)
    }

    async fn refresh_token(&self, tokens: &Tokens) -> AuthResult<Tokens> {
        let Some(refresh_token) = tokens.refresh_token.as_deref() else {
            tracing::debug!("no refresh token; keeping current tokens");
            return Ok(tokens.clone());
        };

        let response = self
            .request("refresh_token", &[("refresh_token", refresh_token)])
            .await?;
        match response.into_tokens(OffsetDateTime::now_utc(), self.expiry_buffer) {
            Some(mut refreshed) => {
                if refreshed.refresh_token.is_none() {
                    refreshed.refresh_token = tokens.refresh_token.clone();
                }
                Ok(refreshed)
            }
            None => {
                tracing::debug!("refresh response has no access_token; keeping current tokens");
                Ok(tokens.clone())
            }
        }
    }
}
