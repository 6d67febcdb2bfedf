//! Authorization callback parameters.
//!
//! Hybrid responses arrive in the URL fragment, which the server never
//! sees. A callback with neither `code` nor `state` is therefore answered
//! with a page that re-posts the fragment ([`CallbackKind::FragmentRedirect`]).
//!
//! Payment exemptions use `response_type=token`, so their callback carries
//! the access token itself ([`CallbackKind::TokenResponse`]).

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;

/// OAuth error codes the identity provider is known to return.
pub const KNOWN_CALLBACK_ERRORS: &[&str] = &["access_denied", "server_error"];

/// Parameters of a redirect back from the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams {
    /// Authorization code of a hybrid response.
    #[serde(default)]
    pub code: Option<String>,
    /// Front-channel ID token bound to `code` and `state`.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Echo of the flow's `state`.
    #[serde(default)]
    pub state: Option<String>,
    /// Access token of a token response.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Token type of a token response.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// OAuth error code.
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable error text.
    #[serde(default)]
    pub error_description: Option<String>,
}

/// What a callback carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind<'a> {
    /// Nothing readable; the parameters are still in the fragment.
    FragmentRedirect,
    /// An authorization response to verify.
    Response {
        state: &'a str,
        code: Option<&'a str>,
        id_token: Option<&'a str>,
    },
    /// A token response to a `response_type=token` request.
    TokenResponse {
        state: &'a str,
        access_token: &'a str,
        token_type: Option<&'a str>,
        expires_in: Option<u64>,
    },
}

/// Result of handling a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Render the page that re-posts the URL fragment.
    FragmentRedirect,
    /// The authorization is active.
    Authorized {
        /// Bank-issued authorization id.
        authorization_id: String,
    },
}

impl CallbackParams {
    /// Parses an `application/x-www-form-urlencoded` query or form body.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches(['?', '#']).as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "id_token" => params.id_token = value,
                "state" => params.state = value,
                "access_token" => params.access_token = value,
                "token_type" => params.token_type = value,
                "expires_in" => params.expires_in = value.and_then(|v| v.parse().ok()),
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }

    /// Classifies the callback.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::OAuthCallback` if the provider sent `error`, and
    /// `AuthError::StateMismatch` if a `code` or `access_token` arrives
    /// without `state`.
    pub fn classify(&self) -> AuthResult<CallbackKind<'_>> {
        if let Some(code) = &self.error {
            if !KNOWN_CALLBACK_ERRORS.contains(&code.as_str()) {
                tracing::warn!(error = %code, "unknown authorization callback error");
            }
            return Err(AuthError::oauth_callback(
                code.clone(),
                self.error_description.clone(),
            ));
        }

        if let Some(access_token) = &self.access_token {
            let state = self.state.as_deref().ok_or(AuthError::StateMismatch)?;
            return Ok(CallbackKind::TokenResponse {
                state,
                access_token,
                token_type: self.token_type.as_deref(),
                expires_in: self.expires_in,
            });
        }

        match (&self.code, &self.state) {
            (None, None) => Ok(CallbackKind::FragmentRedirect),
            (Some(_), None) => Err(AuthError::StateMismatch),
            (code, Some(state)) => Ok(CallbackKind::Response {
                state,
                code: code.as_deref(),
                id_token: self.id_token.as_deref(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_error_wins() {
        let params = CallbackParams::from_query(
            "error=access_denied&error_description=User%20cancelled&state=s&code=c",
        );
        let err = params.classify().unwrap_err();
        match &err {
            AuthError::OAuthCallback { code, description } => {
                assert_eq!(code, "access_denied");
                assert_eq!(description.as_deref(), Some("User cancelled"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.category(), ErrorCategory::Revoked);
    }

    #[test]
    fn test_empty_callback_is_fragment_redirect() {
        assert_eq!(
            CallbackParams::default().classify().unwrap(),
            CallbackKind::FragmentRedirect
        );
    }

    #[test]
    fn test_code_without_state() {
        let params = CallbackParams::from_query("code=abc");
        assert!(matches!(params.classify(), Err(AuthError::StateMismatch)));
    }

    #[test]
    fn test_token_response() {
        let params = CallbackParams::from_query(
            "#access_token=at-1&token_type=Bearer&expires_in=3600&state=s1",
        );
        assert_eq!(
            params.classify().unwrap(),
            CallbackKind::TokenResponse {
                state: "s1",
                access_token: "at-1",
                token_type: Some("Bearer"),
                expires_in: Some(3600),
            }
        );

        let params = CallbackParams::from_query("access_token=at-1&expires_in=soon");
        assert!(params.expires_in.is_none());
        assert!(matches!(params.classify(), Err(AuthError::StateMismatch)));
    }

    #[test]
    fn test_response() {
        let params = CallbackParams::from_query("#code=c1&id_token=a.b.c&state=s1&extra=1");
        assert_eq!(
            params.classify().unwrap(),
            CallbackKind::Response {
                state: "s1",
                code: Some("c1"),
                id_token: Some("a.b.c"),
            }
        );

        let params = CallbackParams::from_query("state=s1");
        assert_eq!(
            params.classify().unwrap(),
            CallbackKind::Response {
                state: "s1",
                code: None,
                id_token: None,
            }
        );
    }
}
