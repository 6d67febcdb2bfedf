//! Relying-party authorization flow.
//!
//! [`RelyingParty`] ties the components together:
//!
//! 1. **Start** - create state/nonce on the session, sign the request
//!    object and return the redirect URL
//! 2. **Callback** - check state, verify the ID token against code and
//!    state, exchange the code, verify the token ID token against the
//!    access and refresh tokens
//! 3. **Commit** - store the tokens on the authorization
//!
//! The session is not written between steps 2 and 3: an abandoned callback
//! leaves the pending authorization exactly as it was.
//!
//! Payment exemptions skip step 2: the callback carries the access token,
//! which is committed once the state matches.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use url::Url;

use crate::AuthResult;
use crate::config::{AuthConfig, CallbackConfig, parse_url};
use crate::error::{AuthError, AuthenticationFailure};
use crate::federation::callback::{CallbackKind, CallbackOutcome, CallbackParams};
use crate::federation::id_token::{HashBinding, IdTokenVerifier};
use crate::federation::jwks::KeyResolver;
use crate::federation::request_object::{ClaimsRequest, RequestObjectBuilder, RequestParams};
use crate::oauth::session::{AuthorizationType, FlowParams, Session};
use crate::oauth::token::{TokenClient, TokenGrants, TokenResponse, Tokens};
use crate::token::jwt::KeySigner;

/// Drives authorizations against the bank's identity provider.
pub struct RelyingParty<G = TokenClient> {
    signer: Arc<KeySigner>,
    request_builder: RequestObjectBuilder,
    id_token_verifier: IdTokenVerifier,
    grants: G,
    authorize_url: Url,
    client_id: String,
    callbacks: CallbackConfig,
    expiry_buffer: Duration,
}

impl RelyingParty<TokenClient> {
    /// Builds every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Signing` if the signing key cannot be loaded and
    /// `AuthError::Configuration` for invalid settings.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let signer = Arc::new(KeySigner::from_config(config)?);
        let resolver = KeyResolver::from_config(config)
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let verifier = IdTokenVerifier::from_config(resolver, config)?;
        Self::new(config, signer, verifier, TokenClient::new(config)?)
    }
}

impl<G: TokenGrants> RelyingParty<G> {
    /// Assembles a relying party from prepared components.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` for an invalid authorize URL or
    /// request-object audience.
    pub fn new(
        config: &AuthConfig,
        signer: Arc<KeySigner>,
        id_token_verifier: IdTokenVerifier,
        grants: G,
    ) -> AuthResult<Self> {
        Ok(Self {
            signer,
            request_builder: RequestObjectBuilder::new(config.request_audience()?),
            id_token_verifier,
            grants,
            authorize_url: parse_url("oidc.authorize_url", &config.oidc.authorize_url)?,
            client_id: config.oidc.client_id.clone(),
            callbacks: config.callbacks.clone(),
            expiry_buffer: config.token_expiry_buffer,
        })
    }

    /// The token grants in use.
    pub fn grants(&self) -> &G {
        &self.grants
    }

    /// The request signer.
    pub fn signer(&self) -> &KeySigner {
        &self.signer
    }

    /// Gets a client-credentials token for the product, used to create the
    /// authorization id before the user is redirected.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenEndpoint` or a network error.
    pub async fn client_credentials_token(
        &self,
        authorization_type: &AuthorizationType,
    ) -> AuthResult<Tokens> {
        self.grants
            .client_credentials(authorization_type.client_credentials_scope())
            .await
    }

    /// Starts a hybrid-flow authorization and returns the redirect URL.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Signing` if the request object cannot be signed;
    /// the session is left unchanged.
    pub fn start_authorization(
        &self,
        session: &mut Session,
        authorization_id: &str,
        authorization_type: AuthorizationType,
    ) -> AuthResult<Url> {
        let acr_values = authorization_type.acr_values();
        let flow = session.begin_flow(authorization_id, authorization_type.clone());
        self.start(session, authorization_id, &authorization_type, &flow, |builder, params| {
            builder.build_authorization_request(params, acr_values)
        })
    }

    /// Starts a payment-exemption authorization (`response_type=token`,
    /// `ca` only). The callback returns the access token directly.
    ///
    /// # Errors
    ///
    /// Same as [`start_authorization`](Self::start_authorization).
    pub fn start_exemption(&self, session: &mut Session, authorization_id: &str) -> AuthResult<Url> {
        let flow = session.begin_exemption_flow(authorization_id);
        self.start(
            session,
            authorization_id,
            &AuthorizationType::Payments,
            &flow,
            RequestObjectBuilder::build_exemption_request,
        )
    }

    fn start<F>(
        &self,
        session: &mut Session,
        authorization_id: &str,
        authorization_type: &AuthorizationType,
        flow: &FlowParams,
        build: F,
    ) -> AuthResult<Url>
    where
        F: FnOnce(&RequestObjectBuilder, &RequestParams<'_>) -> ClaimsRequest,
    {
        let scope = authorization_type.scope();
        let redirect_uri = self.callbacks.for_type(authorization_type).to_string();

        let params = RequestParams {
            authorization_id,
            state: &flow.oauth_state,
            nonce: &flow.nonce,
            scope,
            client_id: &self.client_id,
            redirect_uri: &redirect_uri,
        };
        let request = build(&self.request_builder, &params);
        let signed = match self.signer.sign(&request) {
            Ok(signed) => signed,
            Err(e) => {
                session.logout();
                return Err(e.into());
            }
        };

        tracing::info!(
            authorization_id,
            response_type = %request.response_type,
            "redirecting to authorization endpoint"
        );
        Ok(self
            .request_builder
            .authorization_url(&self.authorize_url, &request, &signed))
    }

    /// Handles the redirect back from the identity provider.
    ///
    /// A hybrid response without the front-channel `id_token` is still
    /// accepted; the ID token from the token endpoint is always verified.
    ///
    /// # Errors
    ///
    /// - `OAuthCallback` if the provider reported an error
    /// - `NoSession` / `StateMismatch` if the state does not match the
    ///   current authorization
    /// - `FlowCancelled` if the callback has no code
    /// - `Authentication` if either ID token fails verification, or a token
    ///   response arrives for a flow that did not request one
    /// - `TokenEndpoint` if the code exchange fails
    pub async fn handle_callback(
        &self,
        session: &mut Session,
        params: &CallbackParams,
    ) -> AuthResult<CallbackOutcome> {
        let (state, code, id_token) = match params.classify()? {
            CallbackKind::FragmentRedirect => return Ok(CallbackOutcome::FragmentRedirect),
            CallbackKind::TokenResponse {
                state,
                access_token,
                token_type,
                expires_in,
            } => {
                let response = TokenResponse {
                    access_token: Some(access_token.to_string()),
                    token_type: token_type.map(str::to_string),
                    expires_in,
                    ..TokenResponse::default()
                };
                return self.complete_token_response(session, state, response);
            }
            CallbackKind::Response {
                state,
                code,
                id_token,
            } => (state, code, id_token),
        };

        let current = session.current().ok_or(AuthError::NoSession)?;
        if current.oauth_state.as_deref() != Some(state) {
            tracing::warn!(authorization_id = %current.authorization_id, "callback state mismatch");
            return Err(AuthError::StateMismatch);
        }
        let authorization_id = current.authorization_id.clone();
        let nonce = current.nonce.clone();
        let redirect_uri = self
            .callbacks
            .for_type(&current.authorization_type)
            .to_string();

        let code = code.ok_or(AuthError::FlowCancelled)?;
        match id_token {
            Some(id_token) => {
                let claims = self
                    .id_token_verifier
                    .verify(
                        id_token,
                        nonce.as_deref(),
                        HashBinding::code_and_state(code, state),
                    )
                    .await?;
                if let Some(bound) = claims.authorization_id.as_deref()
                    && bound != authorization_id
                {
                    tracing::warn!(
                        authorization_id = %authorization_id,
                        id_token_authorization_id = bound,
                        "ID token names another authorization"
                    );
                }
            }
            None => tracing::info!(%authorization_id, "callback has no id_token"),
        }

        let tokens = self.grants.authorization_code(code, &redirect_uri).await?;
        let token_id_token = tokens.id_token.as_deref().ok_or_else(|| {
            AuthError::authentication(
                AuthenticationFailure::Malformed,
                "token response has no id_token",
            )
        })?;
        self.id_token_verifier
            .verify(
                token_id_token,
                None,
                HashBinding::tokens(&tokens.access_token, tokens.refresh_token.as_deref()),
            )
            .await?;

        session.complete_flow(state, tokens)?;
        Ok(CallbackOutcome::Authorized { authorization_id })
    }

    /// Commits the access token of an exemption callback.
    fn complete_token_response(
        &self,
        session: &mut Session,
        state: &str,
        response: TokenResponse,
    ) -> AuthResult<CallbackOutcome> {
        let current = session.current().ok_or(AuthError::NoSession)?;
        if current.oauth_state.as_deref() != Some(state) {
            tracing::warn!(authorization_id = %current.authorization_id, "callback state mismatch");
            return Err(AuthError::StateMismatch);
        }
        if !current.exemption {
            return Err(AuthError::authentication(
                AuthenticationFailure::Malformed,
                "token response for a flow that requested a code",
            ));
        }

        let tokens = response
            .into_tokens(OffsetDateTime::now_utc(), self.expiry_buffer)
            .ok_or_else(|| {
                AuthError::authentication(AuthenticationFailure::Malformed, "empty access_token")
            })?;
        let authorization = session.complete_flow(state, tokens)?;
        Ok(CallbackOutcome::Authorized {
            authorization_id: authorization.authorization_id.clone(),
        })
    }
}
