//! Headers common to every PSD2 API call.

use reqwest::RequestBuilder;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use uuid::Uuid;

use super::ApiContext;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const FAPI_INTERACTION_ID_HEADER: &str = "x-fapi-interaction-id";
pub const CLIENT_CERTIFICATE_HEADER: &str = "x-client-certificate";

/// Adds the bearer token, API key and a fresh set of correlation ids.
///
/// `session_id` is shared by calls that belong together (a payment
/// submission reuses it in the URL).
pub(crate) fn apply(
    builder: RequestBuilder,
    ctx: &ApiContext,
    access_token: &str,
    session_id: &str,
) -> RequestBuilder {
    let builder = builder
        .header(AUTHORIZATION, format!("Bearer {access_token}"))
        .header(API_KEY_HEADER, &ctx.api_key)
        .header(ACCEPT, "application/json")
        .header(SESSION_ID_HEADER, session_id)
        .header(IDEMPOTENCY_KEY_HEADER, Uuid::new_v4().to_string())
        .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
        .header(FAPI_INTERACTION_ID_HEADER, Uuid::new_v4().to_string());
    match &ctx.client_certificate {
        Some(certificate) => builder.header(CLIENT_CERTIFICATE_HEADER, certificate),
        None => builder,
    }
}

/// A new `x-session-id`.
pub(crate) fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
