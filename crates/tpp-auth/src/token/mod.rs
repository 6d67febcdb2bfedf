//! Signing keys and JWS.
//!
//! - Compact JWS for request objects
//! - Detached JWS for request and response bodies

pub mod detached;
pub mod jwt;

pub use detached::{DetachedJws, JWS_SIGNATURE_HEADER, ResponseSignatureVerifier};
pub use jwt::{KeySigner, PublicJwk, PublicJwks, SigningAlgorithm, SigningError, SigningKey};
