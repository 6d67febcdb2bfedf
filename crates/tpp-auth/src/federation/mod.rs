//! Identity provider federation.
//!
//! - JWK set fetching and caching
//! - Signed authorization request objects
//! - ID token verification
//! - Callback handling and the relying-party flow

pub mod auth;
pub mod callback;
pub mod id_token;
pub mod jwks;
pub mod request_object;

pub use auth::RelyingParty;
pub use callback::{CallbackKind, CallbackOutcome, CallbackParams};
pub use id_token::{HashBinding, IdTokenClaims, IdTokenVerifier, left_half_hash};
pub use jwks::{KeyResolutionError, KeyResolver, KeyResolverConfig, ResolvedKey};
pub use request_object::{AcrValue, ClaimsRequest, RequestObjectBuilder, RequestParams};
