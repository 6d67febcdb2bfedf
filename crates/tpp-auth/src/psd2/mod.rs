//! PSD2 domain APIs called with the tokens of an authorization.
//!
//! [`Psd2Apis`] holds the shared HTTP client, endpoints and signing
//! material. Calls made before a user authorization exists (creating the
//! authorization id, creating a payment) take a client-credentials token
//! directly. Everything else goes through a [`BoundInterface`], which
//! [`Session::bind_interfaces`](crate::oauth::session::Session::bind_interfaces)
//! creates only for authorizations with usable tokens.

pub mod accounts;
pub mod funds;
pub mod headers;
pub mod payments;

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use url::Url;

use crate::AuthResult;
use crate::config::{AuthConfig, parse_url};
use crate::error::AuthError;
use crate::oauth::mtls;
use crate::oauth::session::AuthorizationType;
use crate::token::detached::{JWS_SIGNATURE_HEADER, ResponseSignatureVerifier};
use crate::token::jwt::KeySigner;

pub use accounts::AccountsApi;
pub use funds::FundsConfirmationApi;
pub use payments::PaymentsApi;

pub(crate) struct ApiContext {
    pub(crate) http: reqwest::Client,
    pub(crate) accounts_url: Url,
    pub(crate) payments_url: Url,
    pub(crate) funds_confirmation_url: Url,
    pub(crate) api_key: String,
    pub(crate) client_certificate: Option<String>,
    pub(crate) signer: Arc<KeySigner>,
    pub(crate) verifier: ResponseSignatureVerifier,
}

impl ApiContext {
    /// Joins `segments` onto a base URL, percent-encoding each one.
    pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> AuthResult<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| AuthError::configuration(format!("{base} cannot be a base URL")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fails with `Api` for non-success statuses and returns the raw body
    /// and headers otherwise.
    pub(crate) async fn read(
        response: reqwest::Response,
        operation: &'static str,
    ) -> AuthResult<(HeaderMap, Vec<u8>)> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        if !status.is_success() {
            tracing::warn!(operation, status = status.as_u16(), "PSD2 API call failed");
            return Err(AuthError::api(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }
        tracing::debug!(operation, status = status.as_u16(), "PSD2 API call succeeded");
        Ok((headers, body))
    }

    /// Reads a JSON response.
    pub(crate) async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &'static str,
    ) -> AuthResult<T> {
        let (_, body) = Self::read(response, operation).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Reads a JSON response whose `x-jws-signature` must verify against
    /// the exact body bytes.
    pub(crate) async fn read_signed_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> AuthResult<T> {
        let (headers, body) = Self::read(response, operation).await?;
        let signature = headers
            .get(JWS_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AuthError::response_integrity(format!("{operation}: response is not signed"))
            })?;
        if !self.verifier.verify(signature, &body).await {
            return Err(AuthError::response_integrity(format!(
                "{operation}: response signature did not verify"
            )));
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Entry point to the PSD2 APIs.
#[derive(Clone)]
pub struct Psd2Apis {
    ctx: Arc<ApiContext>,
}

impl Psd2Apis {
    /// Creates the API client with the configured client certificate.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` for invalid API URLs or an
    /// unreadable client certificate.
    pub fn new(
        config: &AuthConfig,
        signer: Arc<KeySigner>,
        verifier: ResponseSignatureVerifier,
    ) -> AuthResult<Self> {
        let http = mtls::build_http_client(config, config.timeouts.api_request)?;
        let client_certificate = match (&config.mtls, config.is_sandbox()) {
            (Some(mtls), true) => {
                let pem = std::fs::read_to_string(&mtls.certificate_path).map_err(|e| {
                    AuthError::configuration(format!("{}: {e}", mtls.certificate_path.display()))
                })?;
                Some(mtls::certificate_header_value(&pem))
            }
            _ => None,
        };
        Self::with_http_client(http, config, signer, verifier, client_certificate)
    }

    /// Creates the API client on top of an existing `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` for invalid API URLs.
    pub fn with_http_client(
        http: reqwest::Client,
        config: &AuthConfig,
        signer: Arc<KeySigner>,
        verifier: ResponseSignatureVerifier,
        client_certificate: Option<String>,
    ) -> AuthResult<Self> {
        Ok(Self {
            ctx: Arc::new(ApiContext {
                http,
                accounts_url: parse_url("apis.accounts_url", &config.apis.accounts_url)?,
                payments_url: parse_url("apis.payments_url", &config.apis.payments_url)?,
                funds_confirmation_url: parse_url(
                    "apis.funds_confirmation_url",
                    &config.apis.funds_confirmation_url,
                )?,
                api_key: config.apis.api_key.clone(),
                client_certificate,
                signer,
                verifier,
            }),
        })
    }

    /// Returns the interface for `authorization_type` using `access_token`.
    #[must_use]
    pub fn bind(&self, authorization_type: &AuthorizationType, access_token: &str) -> BoundInterface {
        let ctx = Arc::clone(&self.ctx);
        let access_token = access_token.to_string();
        match authorization_type {
            AuthorizationType::Accounts => {
                BoundInterface::Accounts(AccountsApi::new(ctx, access_token))
            }
            AuthorizationType::Payments => {
                BoundInterface::Payments(PaymentsApi::new(ctx, access_token))
            }
            AuthorizationType::FundsConfirmation { .. } => {
                BoundInterface::FundsConfirmation(FundsConfirmationApi::new(ctx, access_token))
            }
        }
    }

    pub(crate) fn context(&self) -> &ApiContext {
        &self.ctx
    }
}

/// The domain interface of one authorization.
///
/// `Unauthenticated` is bound when the authorization has no usable tokens;
/// every accessor then fails with [`AuthError::NotAuthenticated`].
#[derive(Clone, Default)]
pub enum BoundInterface {
    /// No usable tokens.
    #[default]
    Unauthenticated,
    /// Account information.
    Accounts(AccountsApi),
    /// Payment initiation.
    Payments(PaymentsApi),
    /// Confirmation of funds.
    FundsConfirmation(FundsConfirmationApi),
}

impl BoundInterface {
    /// Returns `true` unless unauthenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Unauthenticated)
    }

    /// Account information API.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotAuthenticated` unless bound to accounts.
    pub fn accounts(&self) -> AuthResult<&AccountsApi> {
        match self {
            Self::Accounts(api) => Ok(api),
            _ => Err(AuthError::NotAuthenticated),
        }
    }

    /// Payment initiation API.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotAuthenticated` unless bound to payments.
    pub fn payments(&self) -> AuthResult<&PaymentsApi> {
        match self {
            Self::Payments(api) => Ok(api),
            _ => Err(AuthError::NotAuthenticated),
        }
    }

    /// Confirmation of funds API.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotAuthenticated` unless bound to funds
    /// confirmation.
    pub fn funds_confirmation(&self) -> AuthResult<&FundsConfirmationApi> {
        match self {
            Self::FundsConfirmation(api) => Ok(api),
            _ => Err(AuthError::NotAuthenticated),
        }
    }
}

impl std::fmt::Debug for BoundInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unauthenticated => "Unauthenticated",
            Self::Accounts(_) => "Accounts",
            Self::Payments(_) => "Payments",
            Self::FundsConfirmation(_) => "FundsConfirmation",
        };
        f.debug_tuple("BoundInterface").field(&name).finish()
    }
}

/// Formats euro cents as the decimal string the APIs expect.
#[must_use]
pub fn eur_amount(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
