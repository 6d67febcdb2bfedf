//! Per-user authorization state.
//!
//! A [`Session`] holds the user's authorizations, most recent first. The
//! current authorization is always index 0; flows are sequential, so
//! starting a second flow before the first callback arrives makes the first
//! one unreachable by [`Session::complete_flow`].

use futures_util::future::join_all;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;
use crate::federation::request_object::AcrValue;
use crate::oauth::token::{TokenGrants, Tokens};
use crate::psd2::{BoundInterface, Psd2Apis};

/// Entropy of `state` and `nonce` values, in bytes.
pub const FLOW_SECRET_BYTES: usize = 12;

/// PSD2 product an authorization grants access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorizationType {
    /// Account information.
    Accounts,
    /// Payment initiation.
    Payments,
    /// Confirmation of funds for an optional account.
    FundsConfirmation {
        /// Account the confirmation is bound to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iban: Option<String>,
    },
}

impl AuthorizationType {
    /// Scope requested in the user authorization.
    #[must_use]
    pub fn scope(&self) -> &'static str {
        match self {
            Self::Accounts => "openid accounts",
            Self::Payments => "openid payments",
            Self::FundsConfirmation { .. } => "openid fundsconfirmations",
        }
    }

    /// Scope of the client-credentials token used before the user
    /// authorization exists.
    #[must_use]
    pub fn client_credentials_scope(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Payments => "payments",
            Self::FundsConfirmation { .. } => "fundsconfirmations",
        }
    }

    /// Authentication strengths accepted for the product.
    #[must_use]
    pub fn acr_values(&self) -> &'static [AcrValue] {
        &[AcrValue::Sca, AcrValue::Ca]
    }

    /// Short name for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Payments => "payments",
            Self::FundsConfirmation { .. } => "funds_confirmation",
        }
    }
}

/// Lifecycle state derived from an authorization's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    /// Created without a pending flow or tokens.
    New,
    /// Redirected to the bank, waiting for the callback.
    PendingCallback,
    /// Tokens present and unexpired.
    Active,
    /// Tokens present but past their expiration date.
    Expired,
}

/// The `state` and `nonce` of a new flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowParams {
    /// CSRF binding echoed by the callback.
    pub oauth_state: String,
    /// Replay binding echoed in the ID token.
    pub nonce: String,
}

/// One authorization held in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    /// Bank-issued authorization id.
    pub authorization_id: String,
    /// Product.
    pub authorization_type: AuthorizationType,
    /// Pending flow state. Cleared on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,
    /// Pending flow nonce. Cleared on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Started with `response_type=token`: the callback carries the access
    /// token instead of a code.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exemption: bool,
    /// Tokens, once the flow completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Tokens>,
    /// Domain interface bound to the current tokens.
    #[serde(skip)]
    pub interface: BoundInterface,
}

impl Authorization {
    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> AuthorizationState {
        match (&self.tokens, &self.oauth_state) {
            (Some(tokens), _) if tokens.is_expired() => AuthorizationState::Expired,
            (Some(_), _) => AuthorizationState::Active,
            (None, Some(_)) => AuthorizationState::PendingCallback,
            (None, None) => AuthorizationState::New,
        }
    }

    /// Returns `true` if the access token is non-empty and unexpired.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.tokens
            .as_ref()
            .is_some_and(|t| !t.access_token.is_empty() && !t.is_expired())
    }

    /// Refreshes expired tokens and stores the result.
    ///
    /// Unexpired tokens are returned without a network call. If the refresh
    /// fails, the stale tokens are returned unchanged; the next API call
    /// will fail upstream and the user has to re-authorize.
    pub async fn ensure_fresh_tokens<G>(&mut self, grants: &G) -> Option<Tokens>
    where
        G: TokenGrants + ?Sized,
    {
        let current = self.tokens.as_ref()?;
        if !current.is_expired() {
            return Some(current.clone());
        }

        tracing::info!(
            authorization_id = %self.authorization_id,
            expired_at = %current.expiration_date,
            "tokens expired, refreshing"
        );
        match grants.refresh_token(current).await {
            Ok(refreshed) => {
                self.tokens = Some(refreshed.without_id_token());
                self.tokens.clone()
            }
            Err(e) => {
                tracing::warn!(
                    authorization_id = %self.authorization_id,
                    error = %e,
                    "token refresh failed, keeping stale tokens"
                );
                Some(current.clone())
            }
        }
    }

    /// Binds the domain interface for the current tokens.
    pub fn bind(&mut self, apis: &Psd2Apis) {
        self.interface = match &self.tokens {
            Some(tokens) if self.is_usable() => {
                apis.bind(&self.authorization_type, &tokens.access_token)
            }
            _ => BoundInterface::Unauthenticated,
        };
    }
}

/// Authorizations of one user, most recent first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    authorizations: Vec<Authorization>,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a flow: prepends a fresh authorization with new random
    /// `state` and `nonce` and returns them.
    pub fn begin_flow(
        &mut self,
        authorization_id: impl Into<String>,
        authorization_type: AuthorizationType,
    ) -> FlowParams {
        let params = FlowParams {
            oauth_state: random_hex(),
            nonce: random_hex(),
        };
        let authorization = Authorization {
            authorization_id: authorization_id.into(),
            authorization_type,
            oauth_state: Some(params.oauth_state.clone()),
            nonce: Some(params.nonce.clone()),
            exemption: false,
            tokens: None,
            interface: BoundInterface::Unauthenticated,
        };
        tracing::debug!(
            authorization_id = %authorization.authorization_id,
            authorization_type = authorization.authorization_type.as_str(),
            "authorization flow started"
        );
        self.authorizations.insert(0, authorization);
        params
    }

    /// Like [`begin_flow`](Self::begin_flow) for a payment exemption, whose
    /// callback returns the access token directly.
    pub fn begin_exemption_flow(&mut self, authorization_id: impl Into<String>) -> FlowParams {
        let params = self.begin_flow(authorization_id, AuthorizationType::Payments);
        if let Some(current) = self.authorizations.first_mut() {
            current.exemption = true;
        }
        params
    }

    /// Stores `tokens` on the current authorization if `oauth_state`
    /// matches its pending state, and clears the state and nonce.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NoSession` for an empty session and
    /// `AuthError::StateMismatch` if the state differs or no flow is
    /// pending. The session is unchanged on error.
    pub fn complete_flow(&mut self, oauth_state: &str, tokens: Tokens) -> AuthResult<&Authorization> {
        let current = self.authorizations.first_mut().ok_or(AuthError::NoSession)?;
        if current.oauth_state.as_deref() != Some(oauth_state) {
            tracing::warn!(authorization_id = %current.authorization_id, "callback state mismatch");
            return Err(AuthError::StateMismatch);
        }

        current.tokens = Some(tokens.without_id_token());
        current.oauth_state = None;
        current.nonce = None;
        tracing::info!(authorization_id = %current.authorization_id, "authorization completed");
        Ok(current)
    }

    /// Returns the current (index 0) authorization.
    #[must_use]
    pub fn current(&self) -> Option<&Authorization> {
        self.authorizations.first()
    }

    /// Mutable access to the current authorization.
    pub fn current_mut(&mut self) -> Option<&mut Authorization> {
        self.authorizations.first_mut()
    }

    /// Finds an authorization by id.
    #[must_use]
    pub fn find(&self, authorization_id: &str) -> Option<&Authorization> {
        self.authorizations
            .iter()
            .find(|a| a.authorization_id == authorization_id)
    }

    /// All authorizations, most recent first.
    #[must_use]
    pub fn authorizations(&self) -> &[Authorization] {
        &self.authorizations
    }

    /// Authorizations with unexpired tokens.
    pub fn list_active(&self) -> impl Iterator<Item = &Authorization> {
        self.authorizations
            .iter()
            .filter(|a| a.state() == AuthorizationState::Active)
    }

    /// Removes an authorization. Returns `true` if one was removed.
    pub fn remove_authorization(&mut self, authorization_id: &str) -> bool {
        let before = self.authorizations.len();
        self.authorizations
            .retain(|a| a.authorization_id != authorization_id);
        before != self.authorizations.len()
    }

    /// Drops the current authorization.
    pub fn logout(&mut self) -> Option<Authorization> {
        if self.authorizations.is_empty() {
            return None;
        }
        Some(self.authorizations.remove(0))
    }

    /// Drops authorizations whose flow never completed.
    pub fn remove_incomplete(&mut self) {
        self.authorizations.retain(|a| a.tokens.is_some());
    }

    /// Returns the unexpired tokens that expire last.
    #[must_use]
    pub fn latest_access_token(&self) -> Option<&Tokens> {
        self.authorizations
            .iter()
            .filter_map(|a| a.tokens.as_ref())
            .filter(|t| !t.is_expired())
            .max_by_key(|t| t.expiration_date)
    }

    /// Returns `true` if the session holds no authorization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.authorizations.is_empty()
    }

    /// Number of authorizations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.authorizations.len()
    }

    /// Refreshes expired tokens of every authorization concurrently.
    pub async fn ensure_fresh_tokens_all<G>(&mut self, grants: &G)
    where
        G: TokenGrants + ?Sized,
    {
        join_all(
            self.authorizations
                .iter_mut()
                .map(|a| a.ensure_fresh_tokens(grants)),
        )
        .await;
    }

    /// Binds every authorization's domain interface.
    pub fn bind_interfaces(&mut self, apis: &Psd2Apis) {
        for authorization in &mut self.authorizations {
            authorization.bind(apis);
        }
    }

    /// Refreshes then binds.
    pub async fn refresh_and_bind<G>(&mut self, grants: &G, apis: &Psd2Apis)
    where
        G: TokenGrants + ?Sized,
    {
        self.ensure_fresh_tokens_all(grants).await;
        self.bind_interfaces(apis);
    }
}

fn random_hex() -> String {
    let mut bytes = [0u8; FLOW_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
