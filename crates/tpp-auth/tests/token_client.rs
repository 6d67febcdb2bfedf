mod common;

use std::time::{Duration, Instant};

use common::{API_KEY, CLIENT_ID, CLIENT_SECRET, MockBank, token_body};
use time::OffsetDateTime;
use tpp_auth::error::ErrorCategory;
use tpp_auth::oauth::{Authorization, AuthorizationType, TokenClient, TokenGrants, Tokens};
use tpp_auth::psd2::BoundInterface;
use tpp_auth::AuthError;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

fn client(bank: &MockBank) -> TokenClient {
    TokenClient::with_http_client(reqwest::Client::new(), &bank.config()).unwrap()
}

fn expired_tokens(refresh_token: Option<&str>) -> Tokens {
    Tokens {
        access_token: "old-access".to_string(),
        refresh_token: refresh_token.map(str::to_string),
        id_token: None,
        token_type: "Bearer".to_string(),
        scope: Some("openid accounts".to_string()),
        expires_in: 3600,
        expiration_date: OffsetDateTime::now_utc() - Duration::from_secs(10),
    }
}

fn authorization(tokens: Tokens) -> Authorization {
    Authorization {
        authorization_id: "auth-1".to_string(),
        authorization_type: AuthorizationType::Accounts,
        oauth_state: None,
        nonce: None,
        exemption: false,
        tokens: Some(tokens),
        interface: BoundInterface::Unauthenticated,
    }
}

#[tokio::test]
async fn client_credentials_grant() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header("x-api-key", API_KEY))
        .and(header("accept", "application/json"))
        .and(header_exists("x-request-id"))
        .and(header_exists("x-session-id"))
        .and(header_exists("x-idempotency-key"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scope=accounts"))
        .and(body_string_contains(format!("client_id={CLIENT_ID}")))
        .and(body_string_contains(format!("client_secret={CLIENT_SECRET}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("cc-access", None, None)))
        .expect(1)
        .mount(&bank.server)
        .await;

    let before = OffsetDateTime::now_utc();
    let tokens = client(&bank).client_credentials("accounts").await.unwrap();
    assert_eq!(tokens.access_token, "cc-access");
    assert_eq!(tokens.expires_in, 3600);

    // expires_in 3600 minus the 120s buffer
    let lifetime = tokens.expiration_date - before;
    assert!(lifetime.whole_seconds() >= 3478 && lifetime.whole_seconds() <= 3482);
    assert!(!tokens.is_expired());
}

#[tokio::test]
async fn authorization_code_grant() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=code-1"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Ftpp.example%2Faccounts%2Fcallback",
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("access", Some("refresh"), Some("idt"))),
        )
        .mount(&bank.server)
        .await;

    let tokens = client(&bank)
        .authorization_code("code-1", "https://tpp.example/accounts/callback")
        .await
        .unwrap();
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh"));
    assert_eq!(tokens.id_token.as_deref(), Some("idt"));
}

#[tokio::test]
async fn revoked_refresh_token_keeps_stale_tokens() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
        )
        .expect(2)
        .mount(&bank.server)
        .await;
    let client = client(&bank);
    let stale = expired_tokens(Some("refresh"));

    let err = client.refresh_token(&stale).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenEndpoint { http_status: 400, .. }));
    assert_eq!(err.category(), ErrorCategory::Revoked);
    assert!(err.requires_reauthorization());

    let mut authorization = authorization(stale.clone());
    let returned = authorization.ensure_fresh_tokens(&client).await;
    assert_eq!(returned, Some(stale.clone()));
    assert_eq!(authorization.tokens, Some(stale));
    assert!(!authorization.is_usable());
}

#[tokio::test]
async fn error_body_with_success_status() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"error":"invalid_client","error_description":"unknown client"}"#,
        ))
        .mount(&bank.server)
        .await;

    let err = client(&bank).client_credentials("accounts").await.unwrap_err();
    match err {
        AuthError::TokenEndpoint { http_status, body } => {
            assert_eq!(http_status, 200);
            assert!(body.contains("invalid_client"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn refresh_rotates_and_keeps_missing_fields() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("new-access", None, Some("idt"))))
        .mount(&bank.server)
        .await;
    let client = client(&bank);

    let mut authorization = authorization(expired_tokens(Some("refresh")));
    let fresh = authorization.ensure_fresh_tokens(&client).await.unwrap();
    assert_eq!(fresh.access_token, "new-access");
    // no refresh_token in the response: the old one stays
    assert_eq!(fresh.refresh_token.as_deref(), Some("refresh"));
    assert!(fresh.id_token.is_none());
    assert!(authorization.is_usable());
}

#[tokio::test]
async fn refresh_without_access_token_keeps_old_tokens() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token_type":"Bearer"}"#))
        .mount(&bank.server)
        .await;

    let stale = expired_tokens(Some("refresh"));
    let result = client(&bank).refresh_token(&stale).await.unwrap();
    assert_eq!(result, stale);
}

#[tokio::test]
async fn refresh_without_refresh_token_makes_no_call() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&bank.server)
        .await;

    let stale = expired_tokens(None);
    let result = client(&bank).refresh_token(&stale).await.unwrap();
    assert_eq!(result, stale);
}

#[tokio::test]
async fn unreachable_endpoint_is_network_error() {
    let mut config = MockBank::start().await.config();
    config.oidc.token_url = "http://127.0.0.1:9/oauth/token".to_string();
    let client = TokenClient::with_http_client(reqwest::Client::new(), &config).unwrap();

    let err = client.client_credentials("accounts").await.unwrap_err();
    assert!(matches!(err, AuthError::Network { .. }));
}

#[tokio::test]
async fn slow_token_endpoint_times_out() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("late", None, None))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&bank.server)
        .await;

    let mut config = bank.config();
    config.timeouts.token_request = Duration::from_millis(200);
    let client = TokenClient::new(&config).unwrap();

    let started = Instant::now();
    let err = client.client_credentials("accounts").await.unwrap_err();
    assert!(matches!(err, AuthError::Network { .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
}
