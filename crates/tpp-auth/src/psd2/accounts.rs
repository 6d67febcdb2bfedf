//! Account information service.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{ApiContext, Psd2Apis, headers};
use crate::AuthResult;

/// Upper bound on followed continuation tokens in
/// [`AccountsApi::all_transactions`].
pub const MAX_TRANSACTION_PAGES: usize = 100;

/// Body of `POST /authorizations`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAuthorizationRequest {
    /// When the authorization lapses.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<OffsetDateTime>,
    /// Earliest transaction visible.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_from: Option<OffsetDateTime>,
    /// Latest transaction visible.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_to: Option<OffsetDateTime>,
}

/// Response of an authorization-creating call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAuthorization {
    /// Bank-issued authorization id.
    pub authorization_id: String,
}

/// An account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Bank-issued account id used in paths.
    pub account_id: String,
    /// IBAN.
    pub identifier: String,
    /// Scheme of `identifier`, normally `IBAN`.
    #[serde(default)]
    pub identifier_scheme: Option<String>,
    /// Product name shown to the user.
    #[serde(default)]
    pub product_name: Option<String>,
    /// Balance after reservations, as a decimal string.
    #[serde(default)]
    pub net_balance: Option<String>,
    /// ISO 4217 currency code.
    #[serde(default)]
    pub currency: Option<String>,
}

/// Counterparty of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Account IBAN.
    #[serde(default)]
    pub iban: Option<String>,
}

/// A booked transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Bank archive id.
    #[serde(default)]
    pub archive_id: Option<String>,
    /// Signed decimal amount.
    #[serde(default)]
    pub amount: Option<String>,
    /// Value date.
    #[serde(default)]
    pub value_date: Option<String>,
    /// Booking date.
    #[serde(default)]
    pub booking_date: Option<String>,
    /// Free-text message.
    #[serde(default)]
    pub message: Option<String>,
    /// Receiving party.
    #[serde(default)]
    pub recipient: Option<Party>,
    /// Paying party.
    #[serde(default)]
    pub payer: Option<Party>,
    /// Bank's own description of the transaction type.
    #[serde(default)]
    pub proprietary_transaction_description: Option<String>,
}

impl Transaction {
    /// Display label: recipient name, else payer name, else the bank's
    /// description.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        fn named(party: &Option<Party>) -> Option<&str> {
            party
                .as_ref()
                .and_then(|p| p.name.as_deref())
                .filter(|n| !n.is_empty())
        }
        named(&self.recipient)
            .or_else(|| named(&self.payer))
            .or(self.proprietary_transaction_description.as_deref())
    }
}

/// One page of transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    /// Transactions on this page.
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    /// Token for the next page; absent on the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

/// A payment card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Bank-issued card id used in paths.
    pub card_id: String,
    /// Product name shown to the user.
    #[serde(default)]
    pub product_name: Option<String>,
    /// Masked card number.
    #[serde(default)]
    pub card_number: Option<String>,
}

/// A card transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTransaction {
    /// Merchant or transaction description.
    #[serde(default)]
    pub description: Option<String>,
    /// Signed decimal amount in euro.
    #[serde(default)]
    pub amount: Option<String>,
    /// Posting date.
    #[serde(default)]
    pub posting_date: Option<String>,
}

/// One page of card transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTransactionPage {
    /// Transactions on this page.
    #[serde(default)]
    pub transactions: Vec<CardTransaction>,
    /// Token for the next page; absent on the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

/// A response page that may continue.
trait Paged: DeserializeOwned {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Paged for TransactionPage {
    type Item = Transaction;

    fn into_parts(self) -> (Vec<Transaction>, Option<String>) {
        (self.transactions, self.continuation_token)
    }
}

impl Paged for CardTransactionPage {
    type Item = CardTransaction;

    fn into_parts(self) -> (Vec<CardTransaction>, Option<String>) {
        (self.transactions, self.continuation_token)
    }
}

impl Psd2Apis {
    /// Creates an account information authorization with a
    /// client-credentials token and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn create_account_authorization(
        &self,
        access_token: &str,
        request: &AccountAuthorizationRequest,
    ) -> AuthResult<String> {
        let ctx = self.context();
        let url = ApiContext::endpoint(&ctx.accounts_url, &["authorizations"])?;
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
            ApiContext::read_json(response, "create_account_authorization").await?;
        tracing::info!(authorization_id = %created.authorization_id, "account authorization created");
        Ok(created.authorization_id)
    }
}

/// Account information bound to an authorization's access token.
#[derive(Clone)]
pub struct AccountsApi {
    ctx: Arc<ApiContext>,
    access_token: String,
}

impl AccountsApi {
    pub(crate) fn new(ctx: Arc<ApiContext>, access_token: String) -> Self {
        Self { ctx, access_token }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
        operation: &'static str,
    ) -> AuthResult<T> {
        let url = ApiContext::endpoint(&self.ctx.accounts_url, segments)?;
        let response = headers::apply(
            self.ctx.http.get(url).query(query),
            &self.ctx,
            &self.access_token,
            &headers::new_session_id(),
        )
        .send()
        .await?;
        ApiContext::read_json(response, operation).await
    }

    /// Lists the accounts the authorization covers.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn accounts(&self) -> AuthResult<Vec<Account>> {
        self.get(&["accounts"], &[], "accounts").await
    }

    /// Fetches one account.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn account(&self, account_id: &str) -> AuthResult<Account> {
        self.get(&["accounts", account_id], &[], "account").await
    }

    async fn page<P: Paged>(
        &self,
        segments: &[&str],
        continuation_token: Option<&str>,
        operation: &'static str,
    ) -> AuthResult<P> {
        let query: Vec<(&str, &str)> = continuation_token
            .map(|token| vec![("continuationToken", token)])
            .unwrap_or_default();
        self.get(segments, &query, operation).await
    }

    /// Follows continuation tokens up to [`MAX_TRANSACTION_PAGES`].
    async fn all_pages<P: Paged>(
        &self,
        segments: &[&str],
        operation: &'static str,
    ) -> AuthResult<Vec<P::Item>> {
        let mut all = Vec::new();
        let mut token: Option<String> = None;
        for _ in 0..MAX_TRANSACTION_PAGES {
            let page: P = self.page(segments, token.as_deref(), operation).await?;
            let (items, next) = page.into_parts();
            all.extend(items);
            match next {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => return Ok(all),
            }
        }
        tracing::warn!(operation, pages = MAX_TRANSACTION_PAGES, "transaction paging stopped");
        Ok(all)
    }

    /// Fetches a page of transactions.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn transactions(
        &self,
        account_id: &str,
        continuation_token: Option<&str>,
    ) -> AuthResult<TransactionPage> {
        self.page(
            &["accounts", account_id, "transactions"],
            continuation_token,
            "transactions",
        )
        .await
    }

    /// Follows continuation tokens and returns every transaction.
    ///
    /// # Errors
    ///
    /// Returns the first page error.
    pub async fn all_transactions(&self, account_id: &str) -> AuthResult<Vec<Transaction>> {
        self.all_pages::<TransactionPage>(&["accounts", account_id, "transactions"], "transactions")
            .await
    }

    /// Lists the cards the authorization covers.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn cards(&self) -> AuthResult<Vec<Card>> {
        self.get(&["cards"], &[], "cards").await
    }

    /// Fetches a page of card transactions.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Api` for error responses.
    pub async fn card_transactions(
        &self,
        card_id: &str,
        continuation_token: Option<&str>,
    ) -> AuthResult<CardTransactionPage> {
        self.page(
            &["cards", card_id, "transactions"],
            continuation_token,
            "card_transactions",
        )
        .await
    }

    /// Follows continuation tokens and returns every card transaction.
    ///
    /// # Errors
    ///
    /// Returns the first page error.
    pub async fn all_card_transactions(&self, card_id: &str) -> AuthResult<Vec<CardTransaction>> {
        self.all_pages::<CardTransactionPage>(&["cards", card_id, "transactions"], "card_transactions")
            .await
    }
}
