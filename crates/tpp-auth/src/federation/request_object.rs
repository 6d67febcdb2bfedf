//! Signed authorization request objects (JAR).
//!
//! A [`ClaimsRequest`] is built per authorization attempt, signed with the
//! [`KeySigner`](crate::token::jwt::KeySigner) and passed as the `request`
//! query parameter. The same values are duplicated in plain query
//! parameters; the identity provider trusts the signed copy.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// Lifetime of a request object in seconds.
pub const REQUEST_OBJECT_LIFETIME_SECS: i64 = 15 * 60;

/// Maximum authentication age requested, in seconds.
pub const MAX_AUTH_AGE_SECS: u64 = 24 * 60 * 60;

/// Hybrid flow response type.
pub const RESPONSE_TYPE_HYBRID: &str = "code id_token";

/// Implicit token response type used for payment exemptions.
pub const RESPONSE_TYPE_TOKEN: &str = "token";

/// Authentication context classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcrValue {
    /// Strong customer authentication.
    #[serde(rename = "urn:openbanking:psd2:sca")]
    Sca,
    /// Customer authentication without SCA.
    #[serde(rename = "urn:openbanking:psd2:ca")]
    Ca,
}

impl AcrValue {
    /// Returns the URN.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sca => "urn:openbanking:psd2:sca",
            Self::Ca => "urn:openbanking:psd2:ca",
        }
    }
}

/// An essential claim with a fixed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueClaim {
    /// Requested value.
    pub value: String,
    /// Always `true`.
    pub essential: bool,
}

/// An essential claim with a set of acceptable values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuesClaim<T> {
    /// Always `true`.
    pub essential: bool,
    /// Acceptable values.
    pub values: Vec<T>,
}

/// Claims requested from the userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserinfoClaims {
    /// Bank-issued authorization id.
    pub authorization_id: ValueClaim,
}

/// Claims requested in the ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenRequestClaims {
    /// Bank-issued authorization id.
    pub authorization_id: ValueClaim,
    /// Required authentication strength.
    pub acr: ValuesClaim<AcrValue>,
}

/// The OIDC `claims` request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedClaims {
    /// Userinfo claims.
    pub userinfo: UserinfoClaims,
    /// ID token claims.
    pub id_token: IdTokenRequestClaims,
}

/// Unsigned request object payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsRequest {
    /// Identity provider audience.
    pub aud: String,
    /// Relying party (client id).
    pub iss: String,
    /// `code id_token` or `token`.
    pub response_type: String,
    /// Client id.
    pub client_id: String,
    /// Registered redirect URI.
    pub redirect_uri: String,
    /// Space separated scopes.
    pub scope: String,
    /// CSRF binding.
    pub state: String,
    /// Replay binding.
    pub nonce: String,
    /// Maximum authentication age in seconds.
    pub max_age: u64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Requested claims.
    pub claims: RequestedClaims,
}

impl ClaimsRequest {
    /// Returns the authorization id the request is bound to.
    #[must_use]
    pub fn authorization_id(&self) -> &str {
        &self.claims.id_token.authorization_id.value
    }
}

/// Per-attempt inputs of a request object.
#[derive(Debug, Clone, Copy)]
pub struct RequestParams<'a> {
    /// Bank-issued authorization id.
    pub authorization_id: &'a str,
    /// Fresh `state`.
    pub state: &'a str,
    /// Fresh `nonce`.
    pub nonce: &'a str,
    /// Space separated scopes.
    pub scope: &'a str,
    /// Client id.
    pub client_id: &'a str,
    /// Redirect URI registered for the authorization type.
    pub redirect_uri: &'a str,
}

/// Builds request objects and the redirect URL that carries them.
#[derive(Debug, Clone)]
pub struct RequestObjectBuilder {
    audience: String,
}

impl RequestObjectBuilder {
    /// Creates a builder addressing `audience` (the identity provider).
    #[must_use]
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
        }
    }

    /// Builds a hybrid-flow (`code id_token`) request.
    ///
    /// `acr_values` lists the authentication strengths the product accepts.
    #[must_use]
    pub fn build_authorization_request(
        &self,
        params: &RequestParams<'_>,
        acr_values: &[AcrValue],
    ) -> ClaimsRequest {
        self.build(params, RESPONSE_TYPE_HYBRID, acr_values.to_vec())
    }

    /// Builds a payment-exemption request: `response_type=token`, `ca` only.
    #[must_use]
    pub fn build_exemption_request(&self, params: &RequestParams<'_>) -> ClaimsRequest {
        self.build(params, RESPONSE_TYPE_TOKEN, vec![AcrValue::Ca])
    }

    fn build(
        &self,
        params: &RequestParams<'_>,
        response_type: &str,
        acr_values: Vec<AcrValue>,
    ) -> ClaimsRequest {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let authorization_id = ValueClaim {
            value: params.authorization_id.to_string(),
            essential: true,
        };

        ClaimsRequest {
            aud: self.audience.clone(),
            iss: params.client_id.to_string(),
            response_type: response_type.to_string(),
            client_id: params.client_id.to_string(),
            redirect_uri: params.redirect_uri.to_string(),
            scope: params.scope.to_string(),
            state: params.state.to_string(),
            nonce: params.nonce.to_string(),
            max_age: MAX_AUTH_AGE_SECS,
            exp: iat + REQUEST_OBJECT_LIFETIME_SECS,
            iat,
            claims: RequestedClaims {
                userinfo: UserinfoClaims {
                    authorization_id: authorization_id.clone(),
                },
                id_token: IdTokenRequestClaims {
                    authorization_id,
                    acr: ValuesClaim {
                        essential: true,
                        values: acr_values,
                    },
                },
            },
        }
    }

    /// Appends the signed request object and its plaintext duplicates to
    /// the authorize endpoint.
    #[must_use]
    pub fn authorization_url(
        &self,
        authorize_endpoint: &Url,
        request: &ClaimsRequest,
        signed_request: &str,
    ) -> Url {
        let mut url = authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("request", signed_request)
            .append_pair("response_type", &request.response_type)
            .append_pair("client_id", &request.client_id)
            .append_pair("scope", &request.scope)
            .append_pair("state", &request.state)
            .append_pair("nonce", &request.nonce)
            .append_pair("redirect_uri", &request.redirect_uri);
        url
    }
}
