mod common;

use std::time::Duration;

use common::{API_KEY, MockBank, token_body};
use serde_json::json;
use time::OffsetDateTime;
use tpp_auth::error::ErrorCategory;
use tpp_auth::oauth::{AuthorizationType, Session, TokenClient, Tokens};
use tpp_auth::psd2::accounts::AccountAuthorizationRequest;
use tpp_auth::psd2::funds::FundsConfirmationAuthorizationRequest;
use tpp_auth::psd2::payments::{
    ForeignAddress, ForeignBankAccount, ForeignFinancialInstitution, ForeignPayee, ForeignPayment,
    Payee, SepaPaymentRequest,
};
use tpp_auth::psd2::{BoundInterface, Psd2Apis, eur_amount};
use tpp_auth::token::ResponseSignatureVerifier;
use tpp_auth::AuthError;
use wiremock::matchers::{
    body_partial_json, header, header_exists, method, path, path_regex, query_param,
};
use wiremock::{Mock, ResponseTemplate};

fn apis(bank: &MockBank, client_certificate: Option<&str>) -> Psd2Apis {
    Psd2Apis::with_http_client(
        reqwest::Client::new(),
        &bank.config(),
        bank.tpp_signer.clone(),
        bank.response_verifier(),
        client_certificate.map(str::to_string),
    )
    .unwrap()
}

fn tokens(access_token: &str, valid_for: Duration, expired: bool) -> Tokens {
    let now = OffsetDateTime::now_utc();
    Tokens {
        access_token: access_token.to_string(),
        refresh_token: Some("refresh".to_string()),
        id_token: None,
        token_type: "Bearer".to_string(),
        scope: None,
        expires_in: valid_for.as_secs(),
        expiration_date: if expired { now - valid_for } else { now + valid_for },
    }
}

/// A session with one completed authorization of `authorization_type`.
fn session_with(authorization_type: AuthorizationType, tokens: Tokens) -> Session {
    let mut session = Session::new();
    let flow = session.begin_flow("auth-1", authorization_type);
    session.complete_flow(&flow.oauth_state, tokens).unwrap();
    session
}

fn payment_request() -> SepaPaymentRequest {
    SepaPaymentRequest {
        authorization_id: None,
        count: 1,
        payee: Payee {
            iban: "FI4950009420028730".to_string(),
            name: "Payee".to_string(),
        },
        amount_eur: eur_amount(1050),
        message: "invoice 1".to_string(),
        payer: None,
    }
}

fn foreign_payment() -> ForeignPayment {
    ForeignPayment {
        authorization_id: None,
        count: 1,
        payee: ForeignPayee {
            bank_account: ForeignBankAccount {
                scheme_name: "BBAN".to_string(),
                id: "12345678".to_string(),
                issuer: "SE".to_string(),
            },
            name: "Foreign payee".to_string(),
            foreign_address: ForeignAddress {
                address_line1: "Storgatan 1".to_string(),
                address_line2: "111 22 Stockholm".to_string(),
                country: "SE".to_string(),
            },
            financial_institution: ForeignFinancialInstitution {
                bic: "ESSESESS".to_string(),
            },
        },
        amount: "250.00".to_string(),
        currency: "SEK".to_string(),
        message: "invoice 2".to_string(),
        payer: None,
    }
}

#[tokio::test]
async fn creates_account_authorization_with_certificate_header() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/v3/authorizations"))
        .and(header("authorization", "Bearer cc-token"))
        .and(header("x-api-key", API_KEY))
        .and(header("x-client-certificate", "MIIBcert"))
        .and(header_exists("x-session-id"))
        .and(header_exists("x-idempotency-key"))
        .and(header_exists("x-request-id"))
        .and(header_exists("x-fapi-interaction-id"))
        .and(body_partial_json(json!({"expires": "2030-01-01T00:00:00Z"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"authorizationId": "auth-9"})))
        .expect(1)
        .mount(&bank.server)
        .await;

    let request = AccountAuthorizationRequest {
        expires: Some(time::macros::datetime!(2030-01-01 00:00 UTC)),
        ..AccountAuthorizationRequest::default()
    };
    let id = apis(&bank, Some("MIIBcert"))
        .create_account_authorization("cc-token", &request)
        .await
        .unwrap();
    assert_eq!(id, "auth-9");
}

#[tokio::test]
async fn creates_funds_confirmation_authorization() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/cof/v1/authorizations"))
        .and(body_partial_json(json!({"iban": "FI4950009420028730"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"authorizationId": "cof-1"})))
        .mount(&bank.server)
        .await;

    let request = FundsConfirmationAuthorizationRequest {
        iban: Some("FI4950009420028730".to_string()),
        expires: None,
    };
    let id = apis(&bank, None)
        .create_funds_confirmation_authorization("cc-token", &request)
        .await
        .unwrap();
    assert_eq!(id, "cof-1");
}

#[tokio::test]
async fn sepa_payment_is_signed_both_ways() {
    let bank = MockBank::start().await;
    bank.mount_jwks().await;
    Mock::given(method("GET"))
        .and(path("/tpp/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bank.tpp_signer.jwks()))
        .mount(&bank.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments/v1/sepa-payments"))
        .and(header_exists("x-jws-signature"))
        .and(body_partial_json(json!({"amountEUR": "10.50", "count": 1})))
        .respond_with(bank.signed_response(
            201,
            &json!({"paymentId": "p-1", "authorizationId": "pay-auth", "status": "CREATED"}),
        ))
        .expect(1)
        .mount(&bank.server)
        .await;

    let payment = apis(&bank, None)
        .create_sepa_payment("cc-token", &payment_request())
        .await
        .unwrap();
    assert_eq!(payment.authorization_id, "pay-auth");
    assert_eq!(payment.payment_id.as_deref(), Some("p-1"));

    // the bank can verify what was sent with the relying party's key
    let requests = bank.server.received_requests().await.unwrap();
    let sent = requests
        .iter()
        .find(|r| r.url.path() == "/payments/v1/sepa-payments")
        .unwrap();
    let signature = sent.headers.get("x-jws-signature").unwrap().to_str().unwrap();
    let tpp_verifier = ResponseSignatureVerifier::new(bank.resolver(), bank.url("/tpp/jwks"));
    assert!(tpp_verifier.verify(signature, &sent.body).await);
}

#[tokio::test]
async fn unsigned_payment_response_fails_integrity() {
    let bank = MockBank::start().await;
    bank.mount_jwks().await;
    Mock::given(method("POST"))
        .and(path("/payments/v1/sepa-payments"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"paymentId": "p-1", "authorizationId": "pay-auth"})),
        )
        .mount(&bank.server)
        .await;

    let err = apis(&bank, None)
        .create_sepa_payment("cc-token", &payment_request())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ResponseIntegrity { .. }));
}

#[tokio::test]
async fn altered_payment_response_fails_integrity() {
    let bank = MockBank::start().await;
    bank.mount_jwks().await;
    let (_, signature) = bank
        .bank_signer
        .sign_json_detached(&json!({"paymentId": "p-1", "authorizationId": "pay-auth"}))
        .unwrap();
    Mock::given(method("POST"))
        .and(path("/payments/v1/sepa-payments"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-jws-signature", signature.as_str())
                .set_body_string(r#"{"paymentId":"p-2","authorizationId":"pay-auth"}"#),
        )
        .mount(&bank.server)
        .await;

    let err = apis(&bank, None)
        .create_sepa_payment("cc-token", &payment_request())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ResponseIntegrity { .. }));
}

#[tokio::test]
async fn foreign_payment_is_signed_both_ways() {
    let bank = MockBank::start().await;
    bank.mount_jwks().await;
    Mock::given(method("GET"))
        .and(path("/tpp/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bank.tpp_signer.jwks()))
        .mount(&bank.server)
        .await;
    let mut created = serde_json::to_value(foreign_payment()).unwrap();
    created["authorizationId"] = json!("foreign-auth");
    Mock::given(method("POST"))
        .and(path("/payments/v1/foreign-payments"))
        .and(header("authorization", "Bearer cc-token"))
        .and(header_exists("x-jws-signature"))
        .and(body_partial_json(json!({
            "currency": "SEK",
            "payee": {"financialInstitution": {"bic": "ESSESESS"}}
        })))
        .respond_with(bank.signed_response(201, &created))
        .expect(1)
        .mount(&bank.server)
        .await;

    let payment = apis(&bank, None)
        .create_foreign_payment("cc-token", &foreign_payment())
        .await
        .unwrap();
    assert_eq!(payment.authorization_id.as_deref(), Some("foreign-auth"));
    assert_eq!(payment.payee, foreign_payment().payee);

    let requests = bank.server.received_requests().await.unwrap();
    let sent = requests
        .iter()
        .find(|r| r.url.path() == "/payments/v1/foreign-payments")
        .unwrap();
    let signature = sent.headers.get("x-jws-signature").unwrap().to_str().unwrap();
    let tpp_verifier = ResponseSignatureVerifier::new(bank.resolver(), bank.url("/tpp/jwks"));
    assert!(tpp_verifier.verify(signature, &sent.body).await);
}

#[tokio::test]
async fn unsigned_foreign_payment_response_fails_integrity() {
    let bank = MockBank::start().await;
    bank.mount_jwks().await;
    Mock::given(method("POST"))
        .and(path("/payments/v1/foreign-payments"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::to_value(foreign_payment()).unwrap()),
        )
        .mount(&bank.server)
        .await;

    let err = apis(&bank, None)
        .create_foreign_payment("cc-token", &foreign_payment())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ResponseIntegrity { .. }));
}

#[tokio::test]
async fn bound_accounts_list_cards_and_card_transactions() {
    let bank = MockBank::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/v3/cards"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"cardId": "card-1", "productName": "Debit", "cardNumber": "5123 45** **** 1234"}
        ])))
        .mount(&bank.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/v3/cards/card-1/transactions"))
        .and(query_param("continuationToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": [{"description": "Kahvila", "amount": "-3.50", "postingDate": "2024-05-03"}]
        })))
        .expect(1)
        .mount(&bank.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/v3/cards/card-1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": [{"description": "Kauppa", "amount": "-12.00", "postingDate": "2024-05-02"}],
            "continuationToken": "page-2"
        })))
        .expect(2)
        .mount(&bank.server)
        .await;

    let mut session = session_with(
        AuthorizationType::Accounts,
        tokens("user-token", Duration::from_secs(600), false),
    );
    session.bind_interfaces(&apis(&bank, None));
    let accounts = session.current().unwrap().interface.accounts().unwrap();

    let cards = accounts.cards().await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].card_id, "card-1");
    assert_eq!(cards[0].product_name.as_deref(), Some("Debit"));

    let first = accounts.card_transactions("card-1", None).await.unwrap();
    assert_eq!(first.continuation_token.as_deref(), Some("page-2"));

    let all = accounts.all_card_transactions("card-1").await.unwrap();
    let descriptions: Vec<_> = all.iter().filter_map(|t| t.description.as_deref()).collect();
    assert_eq!(descriptions, ["Kauppa", "Kahvila"]);
}

#[tokio::test]
async fn bound_accounts_follow_pagination() {
    let bank = MockBank::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/v3/accounts"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"accountId": "acc-1", "identifier": "FI4950009420028730", "currency": "EUR"}
        ])))
        .mount(&bank.server)
        .await;
    // the continuation mock is mounted first so it wins when both match
    Mock::given(method("GET"))
        .and(path("/accounts/v3/accounts/acc-1/transactions"))
        .and(query_param("continuationToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": [{"archiveId": "t-2", "payer": {"name": "Payer"}}]
        })))
        .expect(1)
        .mount(&bank.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/v3/accounts/acc-1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": [{"archiveId": "t-1", "recipient": {"name": "Shop"}}],
            "continuationToken": "page-2"
        })))
        .expect(1)
        .mount(&bank.server)
        .await;

    let mut session = session_with(
        AuthorizationType::Accounts,
        tokens("user-token", Duration::from_secs(600), false),
    );
    session.bind_interfaces(&apis(&bank, None));
    let accounts = session.current().unwrap().interface.accounts().unwrap();

    let listed = accounts.accounts().await.unwrap();
    assert_eq!(listed[0].account_id, "acc-1");

    let transactions = accounts.all_transactions("acc-1").await.unwrap();
    let labels: Vec<_> = transactions.iter().filter_map(|t| t.label()).collect();
    assert_eq!(labels, ["Shop", "Payer"]);
}

#[tokio::test]
async fn expired_upstream_token_is_token_expired() {
    let bank = MockBank::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/v3/accounts"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&bank.server)
        .await;

    let interface = apis(&bank, None).bind(&AuthorizationType::Accounts, "user-token");
    let err = interface.accounts().unwrap().accounts().await.unwrap_err();
    assert!(matches!(err, AuthError::Api { http_status: 401, .. }));
    assert_eq!(err.category(), ErrorCategory::TokenExpired);
}

#[tokio::test]
async fn unauthenticated_interface_refuses_calls() {
    let bank = MockBank::start().await;
    let mut session = session_with(
        AuthorizationType::Accounts,
        tokens("user-token", Duration::from_secs(600), true),
    );
    session.bind_interfaces(&apis(&bank, None));

    let interface = &session.current().unwrap().interface;
    assert!(!interface.is_authenticated());
    assert!(matches!(interface.accounts(), Err(AuthError::NotAuthenticated)));
    assert!(matches!(interface.payments(), Err(AuthError::NotAuthenticated)));
    assert!(matches!(
        BoundInterface::default().funds_confirmation(),
        Err(AuthError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn payments_interface_submits_with_signed_response() {
    let bank = MockBank::start().await;
    bank.mount_jwks().await;
    Mock::given(method("GET"))
        .and(path("/payments/v1/authorizations/pay-auth/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorizedCount": 1,
            "payments": [{"paymentId": "p-1", "authorizationId": "pay-auth"}]
        })))
        .mount(&bank.server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/payments/v1/sepa-payments/p-1/submissions/[0-9a-f-]{36}$"))
        .respond_with(bank.signed_response(200, &json!({"paymentId": "p-1", "status": "PROCESSED"})))
        .expect(1)
        .mount(&bank.server)
        .await;

    let interface = apis(&bank, None).bind(&AuthorizationType::Payments, "user-token");
    let payments = interface.payments().unwrap();

    let listed = payments.payments_for_authorization("pay-auth").await.unwrap();
    assert_eq!(listed.authorized_count, Some(1));
    let result = payments.submit_payment("p-1").await.unwrap();
    assert_eq!(result.status, "PROCESSED");
}

#[tokio::test]
async fn confirms_funds() {
    let bank = MockBank::start().await;
    Mock::given(method("GET"))
        .and(path("/cof/v1/authorizations/cof-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorizationId": "cof-1", "iban": "FI4950009420028730"
        })))
        .mount(&bank.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cof/v1/funds-confirmations"))
        .and(body_partial_json(json!({"authorizationId": "cof-1", "amountEUR": "25.00"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fundsAvailable": true, "amountEUR": "25.00"
        })))
        .mount(&bank.server)
        .await;

    let authorization_type = AuthorizationType::FundsConfirmation { iban: None };
    let interface = apis(&bank, None).bind(&authorization_type, "user-token");
    let funds = interface.funds_confirmation().unwrap();

    let authorization = funds.authorization("cof-1").await.unwrap();
    assert_eq!(authorization.iban.as_deref(), Some("FI4950009420028730"));
    let confirmation = funds.confirm_funds("cof-1", &eur_amount(2500)).await.unwrap();
    assert!(confirmation.funds_available);
}

#[tokio::test]
async fn refresh_and_bind_restores_interface() {
    let bank = MockBank::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh", Some("refresh-2"), None)))
        .expect(1)
        .mount(&bank.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/v3/accounts"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&bank.server)
        .await;

    let config = bank.config();
    let grants = TokenClient::with_http_client(reqwest::Client::new(), &config).unwrap();
    let mut session = session_with(
        AuthorizationType::Accounts,
        tokens("stale", Duration::from_secs(60), true),
    );

    session.refresh_and_bind(&grants, &apis(&bank, None)).await;
    let current = session.current().unwrap();
    assert_eq!(
        current.tokens.as_ref().unwrap().refresh_token.as_deref(),
        Some("refresh-2")
    );
    let accounts = current.interface.accounts().unwrap().accounts().await.unwrap();
    assert!(accounts.is_empty());
}
