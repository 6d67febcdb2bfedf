//! Payment initiation service.
//!
//! Payment creation bodies (SEPA and foreign) are signed with a detached
//! JWS and the created payment is accepted only if its response signature
//! verifies.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ApiContext, Psd2Apis, headers};
use crate::AuthResult;
use crate::error::AuthError;
use crate::token::detached::JWS_SIGNATURE_HEADER;

/// Receiving party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    /// Receiving account IBAN.
    pub iban: String,
    /// Receiver name.
    pub name: String,
}

/// Debtor account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerAccount {
    /// Debtor account IBAN.
    pub iban: String,
}

/// Body of `POST /sepa-payments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SepaPaymentRequest {
    /// Set when bundling into an existing authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    /// Recurrence count.
    pub count: u32,
    /// Receiving party.
    pub payee: Payee,
    /// Decimal euro amount, see [`eur_amount`](super::eur_amount).
    #[serde(rename = "amountEUR")]
    pub amount_eur: String,
    /// Message to the receiver.
    pub message: String,
    /// Debtor account; the user picks one at the bank if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<PayerAccount>,
}

/// A payment as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SepaPaymentDetails {
    /// Bank-issued payment id.
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Authorization the payment belongs to.
    pub authorization_id: String,
    /// Payment status, e.g. `Unauthorized` or `Authorized`.
    #[serde(default)]
    pub status: Option<String>,
    /// Decimal euro amount.
    #[serde(default, rename = "amountEUR")]
    pub amount_eur: Option<String>,
    /// Recurrence count.
    #[serde(default)]
    pub count: Option<u32>,
    /// Receiving party.
    #[serde(default)]
    pub payee: Option<Payee>,
    /// Debtor account.
    #[serde(default)]
    pub payer: Option<PayerAccount>,
    /// Message to the receiver.
    #[serde(default)]
    pub message: Option<String>,
}

/// Account of a foreign receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignBankAccount {
    /// Account identifier scheme, e.g. `IBAN` or `BBAN`.
    pub scheme_name: String,
    /// Account identifier.
    pub id: String,
    /// Issuer of the identifier.
    pub issuer: String,
}

/// Postal address of a foreign receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignAddress {
    /// First address line.
    pub address_line1: String,
    /// Second address line.
    pub address_line2: String,
    /// ISO 3166 country code.
    pub country: String,
}

/// Receiver's bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignFinancialInstitution {
    /// BIC of the receiving bank.
    pub bic: String,
}

/// Receiving party of a foreign payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignPayee {
    /// Receiving account.
    pub bank_account: ForeignBankAccount,
    /// Receiver name.
    pub name: String,
    /// Receiver address.
    pub foreign_address: ForeignAddress,
    /// Receiving bank.
    pub financial_institution: ForeignFinancialInstitution,
}

/// Body of `POST /foreign-payments`, also the shape of the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignPayment {
    /// Set by the bank on the created payment, or when bundling into an
    /// existing authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    /// Recurrence count.
    pub count: u32,
    /// Receiving party.
    pub payee: ForeignPayee,
    /// Decimal amount in `currency`.
    pub amount: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Message to the receiver.
    pub message: String,
    /// Debtor account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<PayerAccount>,
}

/// Payments under one authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedPayments {
    /// Number of payments in `Authorized` state.
    #[serde(default)]
    pub authorized_count: Option<u32>,
    /// The payments.
    #[serde(default)]
    pub payments: Vec<SepaPaymentDetails>,
}

/// Result of submitting a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    /// Submitted payment id.
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Resulting status.
    pub status: String,
}

impl Psd2Apis {
    /// Creates a SEPA payment with a client-credentials token.
    ///
    /// The body is signed as sent; the response must carry a valid
    /// `x-jws-signature`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses and
    /// `AuthError::ResponseIntegrity` if the response signature does not
    /// verify.
    pub async fn create_sepa_payment(
        &self,
        access_token: &str,
        request: &SepaPaymentRequest,
    ) -> AuthResult<SepaPaymentDetails> {
        let payment: SepaPaymentDetails = self
            .create_signed(access_token, "sepa-payments", request, "create_sepa_payment")
            .await?;
        tracing::info!(authorization_id = %payment.authorization_id, "payment created");
        Ok(payment)
    }

    /// Creates a foreign (non-SEPA) payment with a client-credentials
    /// token, signed and verified like [`create_sepa_payment`](Self::create_sepa_payment).
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses and
    /// `AuthError::ResponseIntegrity` if the response signature does not
    /// verify.
    pub async fn create_foreign_payment(
        &self,
        access_token: &str,
        request: &ForeignPayment,
    ) -> AuthResult<ForeignPayment> {
        let payment: ForeignPayment = self
            .create_signed(access_token, "foreign-payments", request, "create_foreign_payment")
            .await?;
        tracing::info!(
            authorization_id = payment.authorization_id.as_deref().unwrap_or_default(),
            currency = %payment.currency,
            "foreign payment created"
        );
        Ok(payment)
    }

    async fn create_signed<Req, Resp>(
        &self,
        access_token: &str,
        segment: &str,
        request: &Req,
        operation: &'static str,
    ) -> AuthResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let ctx = self.context();
        let (body, signature) = ctx
            .signer
            .sign_json_detached(request)
            .map_err(AuthError::from)?;
        let url = ApiContext::endpoint(&ctx.payments_url, &[segment])?;
        let response = headers::apply(
            ctx.http.post(url),
            ctx,
            access_token,
            &headers::new_session_id(),
        )
        .header(JWS_SIGNATURE_HEADER, signature.as_str())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;

        ctx.read_signed_json(response, operation).await
    }
}

/// Payment initiation bound to an authorization's access token.
#[derive(Clone)]
pub struct PaymentsApi {
    ctx: Arc<ApiContext>,
    access_token: String,
}

impl PaymentsApi {
    pub(crate) fn new(ctx: Arc<ApiContext>, access_token: String) -> Self {
        Self { ctx, access_token }
    }

    /// Lists the payments of an authorization.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn payments_for_authorization(
        &self,
        authorization_id: &str,
    ) -> AuthResult<AuthorizedPayments> {
        let url = ApiContext::endpoint(
            &self.ctx.payments_url,
            &["authorizations", authorization_id, "payments"],
        )?;
        let response = headers::apply(
            self.ctx.http.get(url),
            &self.ctx,
            &self.access_token,
            &headers::new_session_id(),
        )
        .send()
        .await?;
        ApiContext::read_json(response, "payments_for_authorization").await
    }

    /// Submits an authorized payment for execution.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses and
    /// `AuthError::ResponseIntegrity` if the response signature does not
    /// verify.
    pub async fn submit_payment(&self, payment_id: &str) -> AuthResult<SubmissionResult> {
        let session_id = headers::new_session_id();
        let url = ApiContext::endpoint(
            &self.ctx.payments_url,
            &["sepa-payments", payment_id, "submissions", session_id.as_str()],
        )?;
        let response = headers::apply(
            self.ctx.http.put(url),
            &self.ctx,
            &self.access_token,
            &session_id,
        )
        .send()
        .await?;
        let result: SubmissionResult = self.ctx.read_signed_json(response, "submit_payment").await?;
        tracing::info!(payment_id, status = %result.status, "payment submitted");
        Ok(result)
    }
}
