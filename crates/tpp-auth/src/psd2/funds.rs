//! Confirmation of funds service.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::accounts::CreatedAuthorization;
use super::{ApiContext, Psd2Apis, headers};
use crate::AuthResult;

/// Body of the funds-confirmation `POST /authorizations`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsConfirmationAuthorizationRequest {
    /// Account to cover; the user picks one at the bank if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iban: Option<String>,
    /// When the authorization lapses.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<OffsetDateTime>,
}

/// A funds-confirmation authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundsConfirmationAuthorization {
    /// Bank-issued authorization id.
    pub authorization_id: String,
    /// Account chosen by the user during authorization.
    #[serde(default)]
    pub iban: Option<String>,
    /// Expiry as sent by the bank.
    #[serde(default)]
    pub expires: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FundsConfirmationRequest<'a> {
    authorization_id: &'a str,
    #[serde(rename = "amountEUR")]
    amount_eur: &'a str,
}

/// Answer to a funds confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundsConfirmation {
    /// Whether the amount is covered.
    pub funds_available: bool,
    /// Amount that was checked.
    #[serde(default, rename = "amountEUR")]
    pub amount_eur: Option<String>,
}

impl Psd2Apis {
    /// Creates a funds-confirmation authorization with a client-credentials
    /// token and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn create_funds_confirmation_authorization(
        &self,
        access_token: &str,
        request: &FundsConfirmationAuthorizationRequest,
    ) -> AuthResult<String> {
        let ctx = self.context();
        let url = ApiContext::endpoint(&ctx.funds_confirmation_url, &["authorizations"])?;
        let response = headers::apply(
            ctx.http.post(url),
            ctx,
            access_token,
            &headers::new_session_id(),
        )
        .json(request)
        .send()
        .await?;
        let created: CreatedAuthorization =
            ApiContext::read_json(response, "create_funds_confirmation_authorization").await?;
        tracing::info!(authorization_id = %created.authorization_id, "funds confirmation authorization created");
        Ok(created.authorization_id)
    }
}

/// Confirmation of funds bound to an authorization's access token.
#[derive(Clone)]
pub struct FundsConfirmationApi {
    ctx: Arc<ApiContext>,
    access_token: String,
}

impl FundsConfirmationApi {
    pub(crate) fn new(ctx: Arc<ApiContext>, access_token: String) -> Self {
        Self { ctx, access_token }
    }

    /// Reads the authorization, including the account the user picked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn authorization(
        &self,
        authorization_id: &str,
    ) -> AuthResult<FundsConfirmationAuthorization> {
        let url = ApiContext::endpoint(
            &self.ctx.funds_confirmation_url,
            &["authorizations", authorization_id],
        )?;
        let response = headers::apply(
            self.ctx.http.get(url),
            &self.ctx,
            &self.access_token,
            &headers::new_session_id(),
        )
        .send()
        .await?;
        ApiContext::read_json(response, "funds_confirmation_authorization").await
    }

    /// Asks whether `amount_eur` is available on the authorized account.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn confirm_funds(
        &self,
        authorization_id: &str,
        amount_eur: &str,
    ) -> AuthResult<FundsConfirmation> {
        let url = ApiContext::endpoint(&self.ctx.funds_confirmation_url, &["funds-confirmations"])?;
        let response = headers::apply(
            self.ctx.http.post(url),
            &self.ctx,
            &self.access_token,
            &headers::new_session_id(),
        )
        .json(&FundsConfirmationRequest {
            authorization_id,
            amount_eur,
        })
        .send()
        .await?;
        let confirmation: FundsConfirmation =
            ApiContext::read_json(response, "confirm_funds").await?;
        tracing::debug!(
            authorization_id,
            funds_available = confirmation.funds_available,
            "funds confirmed"
        );
        Ok(confirmation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_request_body() {
        let body = serde_json::to_value(FundsConfirmationRequest {
            authorization_id: "a-1",
            amount_eur: "10.00",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"authorizationId": "a-1", "amountEUR": "10.00"})
        );
    }

    #[test]
    fn test_authorization_request_skips_empty() {
        let body = serde_json::to_value(FundsConfirmationAuthorizationRequest::default()).unwrap();
        assert_eq!(body, serde_json::json!({}));
    }
}
