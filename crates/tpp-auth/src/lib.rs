//! # tpp-auth
//!
//! Relying-party authorization engine for Open Banking (PSD2) APIs.
//!
//! This crate provides:
//! - OIDC hybrid-flow (`code id_token`) authorizations with signed request
//!   objects (JAR)
//! - ID token verification including `c_hash`/`s_hash`/`at_hash`/`rt_hash`
//!   binding
//! - Detached JWS signing of request bodies and verification of signed
//!   responses
//! - A cached JWKS resolver
//! - Token endpoint grants over mutual TLS
//! - Per-user sessions holding several authorizations
//! - Account information, payment initiation and confirmation of funds
//!   calls bound to an authorization
//!
//! ## Modules
//!
//! - [`config`] - Configuration and layered loading
//! - [`error`] - Error taxonomy and recovery categories
//! - [`token`] - Signing keys, compact and detached JWS
//! - [`federation`] - JWKS, request objects, ID tokens, callback flow
//! - [`oauth`] - Token endpoint client, mutual TLS, sessions
//! - [`psd2`] - Domain APIs
//! - [`observability`] - Tracing setup

pub mod config;
pub mod error;
pub mod federation;
pub mod oauth;
pub mod observability;
pub mod psd2;
pub mod token;

pub use config::{AuthConfig, ConfigError, Environment};
pub use error::{AuthError, AuthenticationFailure, ErrorCategory};
pub use federation::{
    CallbackOutcome, CallbackParams, HashBinding, IdTokenClaims, IdTokenVerifier, KeyResolver,
    KeyResolverConfig, RelyingParty, RequestObjectBuilder,
};
pub use oauth::{
    Authorization, AuthorizationState, AuthorizationType, FlowParams, Session, TokenClient,
    TokenGrants, Tokens,
};
pub use psd2::{BoundInterface, Psd2Apis};
pub use token::{DetachedJws, KeySigner, ResponseSignatureVerifier, SigningAlgorithm, SigningKey};

/// Type alias for authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tpp_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::federation::{CallbackOutcome, CallbackParams, RelyingParty};
    pub use crate::oauth::{AuthorizationType, Session, TokenClient, TokenGrants, Tokens};
    pub use crate::psd2::{BoundInterface, Psd2Apis};
    pub use crate::token::{KeySigner, ResponseSignatureVerifier};
}
