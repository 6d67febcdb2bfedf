//! OAuth client side: token grants, mutual TLS and session state.

pub mod mtls;
pub mod session;
pub mod token;

pub use session::{Authorization, AuthorizationState, AuthorizationType, FlowParams, Session};
pub use token::{TokenClient, TokenGrants, TokenResponse, Tokens};
