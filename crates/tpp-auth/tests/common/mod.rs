//! Shared fixtures: a mock bank (identity provider, token endpoint, PSD2
//! APIs) on one wiremock server, plus the relying party's own key.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use time::OffsetDateTime;
use tpp_auth::config::{ApiConfig, AuthConfig, CallbackConfig, OidcConfig, SigningConfig};
use tpp_auth::federation::{IdTokenVerifier, KeyResolver, KeyResolverConfig};
use tpp_auth::token::{KeySigner, ResponseSignatureVerifier, SigningKey};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "tpp-client";
pub const CLIENT_SECRET: &str = "tpp-secret";
pub const API_KEY: &str = "api-key";
pub const BANK_KID: &str = "bank-kid";
pub const TPP_KID: &str = "tpp-kid";

pub struct MockBank {
    pub server: MockServer,
    /// The bank's key: signs ID tokens and API responses.
    pub bank_signer: KeySigner,
    /// The relying party's key: signs request objects and payment bodies.
    pub tpp_signer: Arc<KeySigner>,
}

impl MockBank {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            bank_signer: KeySigner::new(SigningKey::generate_ec(BANK_KID).expect("bank key")),
            tpp_signer: Arc::new(KeySigner::new(
                SigningKey::generate_ec(TPP_KID).expect("tpp key"),
            )),
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("{}{path}", self.uri())).expect("url")
    }

    /// Expected issuer: the origin of the authorize endpoint.
    pub fn issuer(&self) -> String {
        self.uri()
    }

    pub fn config(&self) -> AuthConfig {
        let base = self.uri();
        AuthConfig {
            oidc: OidcConfig {
                authorize_url: format!("{base}/oauth/authorize"),
                token_url: format!("{base}/oauth/token"),
                jwks_url: format!("{base}/oauth/jwks"),
                issuer: None,
                request_audience: None,
                client_id: CLIENT_ID.to_string(),
                client_secret: CLIENT_SECRET.to_string(),
            },
            callbacks: CallbackConfig {
                accounts: "https://tpp.example/accounts/callback".to_string(),
                payments: "https://tpp.example/payments/callback".to_string(),
                funds_confirmation: "https://tpp.example/cof/callback".to_string(),
            },
            signing: SigningConfig {
                kid: TPP_KID.to_string(),
                key_pem: Some("unused".to_string()),
                ..SigningConfig::default()
            },
            apis: ApiConfig {
                accounts_url: format!("{base}/accounts/v3"),
                payments_url: format!("{base}/payments/v1"),
                funds_confirmation_url: format!("{base}/cof/v1"),
                payments_jwks_url: format!("{base}/payments/jwks"),
                api_key: API_KEY.to_string(),
            },
            ..AuthConfig::default()
        }
    }

    /// Serves the bank key at both JWKS endpoints.
    pub async fn mount_jwks(&self) {
        for jwks_path in ["/oauth/jwks", "/payments/jwks"] {
            Mock::given(method("GET"))
                .and(path(jwks_path))
                .respond_with(ResponseTemplate::new(200).set_body_json(self.bank_signer.jwks()))
                .mount(&self.server)
                .await;
        }
    }

    pub fn resolver(&self) -> KeyResolver {
        KeyResolver::new(
            KeyResolverConfig::default()
                .with_allow_http(true)
                .with_request_timeout(Duration::from_secs(2)),
        )
        .expect("resolver")
    }

    pub fn id_token_verifier(&self) -> IdTokenVerifier {
        IdTokenVerifier::new(
            self.resolver(),
            self.url("/oauth/jwks"),
            self.issuer(),
            CLIENT_ID,
            Duration::from_secs(120),
        )
    }

    pub fn response_verifier(&self) -> ResponseSignatureVerifier {
        ResponseSignatureVerifier::new(self.resolver(), self.url("/payments/jwks"))
    }

    /// Standard ID token claims valid for five minutes.
    pub fn claims(&self) -> Value {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        json!({
            "iss": self.issuer(),
            "sub": "user-1",
            "aud": CLIENT_ID,
            "iat": now,
            "exp": now + 300,
            "authorizationId": "auth-1",
            "acr": "urn:openbanking:psd2:sca",
        })
    }

    /// Signs `claims` with the bank key.
    pub fn id_token(&self, claims: &Value) -> String {
        self.bank_signer.sign(claims).expect("sign id token")
    }

    /// A response carrying `body` and its detached signature.
    pub fn signed_response(&self, status: u16, body: &Value) -> ResponseTemplate {
        let (raw, signature) = self
            .bank_signer
            .sign_json_detached(body)
            .expect("sign response");
        ResponseTemplate::new(status)
            .insert_header("x-jws-signature", signature.as_str())
            .insert_header("content-type", "application/json")
            .set_body_string(raw)
    }
}

/// A token endpoint body valid for an hour.
pub fn token_body(access_token: &str, refresh_token: Option<&str>, id_token: Option<&str>) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "openid accounts",
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = json!(refresh_token);
    }
    if let Some(id_token) = id_token {
        body["id_token"] = json!(id_token);
    }
    body
}
