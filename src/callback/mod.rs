//! Callback leg: validate the provider redirect and exchange the code.
//!
//! Each invocation walks the stages below and stops at the first failure:
//!
//! ```text
//! RECEIVED ─► CSRF_CHECKED ─► CODE_VALIDATED ─► EXCHANGED ─► EXPIRY_COMPUTED
//!    │             │                │                │
//!  400 malformed  400 state       400 code      provider status
//! ```
//!
//! The CSRF check runs before the query is inspected for anything else, so a
//! forged callback never reaches the token endpoint and learns nothing about
//! whether it carried a code.

use crate::config::{ConfigError, OAuthSettings};
use crate::credentials::CredentialRecord;
use crate::csrf::{CsrfError, CsrfStateBinder};
use crate::provider::{AuthorizationProviderClient, ExchangeError, TokenExchangeRequest, TokenResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};


/// Callback query parameters
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// Scopes the user actually granted, comma separated
    pub scopes: Option<String>,
}

impl CallbackQuery {
    /// Parse a raw query string. Repeated keys are malformed.
    pub fn parse(raw: Option<&str>) -> Result<Self, CallbackError> {
        match raw {
            None | Some("") => Ok(Self::default()),
            Some(raw) => serde_urlencoded::from_str(raw)
                .map_err(|e| CallbackError::InvalidRequest(e.to_string())),
        }
    }
}

/// Stage names used in log fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackStage {
    Received,
    CsrfChecked,
    CodeValidated,
    Exchanged,
    ExpiryComputed,
}

impl CallbackStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackStage::Received => "received",
            CallbackStage::CsrfChecked => "csrf_checked",
            CallbackStage::CodeValidated => "code_validated",
            CallbackStage::Exchanged => "exchanged",
            CallbackStage::ExpiryComputed => "expiry_computed",
        }
    }
}

/// Terminal callback failures
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("malformed callback query: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Csrf(#[from] CsrfError),

    /// The provider redirected back with an OAuth error (e.g. consent denied)
    #[error("authorization failed: {error} - {description}")]
    AuthorizationDenied { error: String, description: String },

    #[error("missing authorization code")]
    MissingCode,

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl CallbackError {
    /// Stage at which the invocation stopped
    pub fn stage(&self) -> CallbackStage {
        match self {
            CallbackError::InvalidRequest(_) => CallbackStage::Received,
            CallbackError::Csrf(_) => CallbackStage::CsrfChecked,
            CallbackError::AuthorizationDenied { .. } | CallbackError::MissingCode => {
                CallbackStage::CodeValidated
            }
            CallbackError::Configuration(_) | CallbackError::Exchange(_) => CallbackStage::Exchanged,
        }
    }
}

/// Drives one callback invocation from raw request parts to a record.
///
/// Holds only immutable configuration; concurrent invocations share it
/// without coordination.
pub struct CallbackExchanger {
    provider: Arc<dyn AuthorizationProviderClient>,
    binder: CsrfStateBinder,
    client_key: String,
    client_secret: String,
    redirect_uri: String,
}

impl CallbackExchanger {
    pub fn new(
        settings: &OAuthSettings,
        binder: CsrfStateBinder,
        provider: Arc<dyn AuthorizationProviderClient>,
    ) -> Self {
        Self {
            provider,
            binder,
            client_key: settings.client_key.trim().to_string(),
            client_secret: settings.client_secret.trim().to_string(),
            redirect_uri: settings.redirect_uri.trim().to_string(),
        }
    }

    pub fn binder(&self) -> &CsrfStateBinder {
        &self.binder
    }

    /// Run the callback state machine.
    ///
    /// # Arguments
    /// * `raw_query` - Query string of the callback request, undecoded
    /// * `cookie_header` - Raw `Cookie` header, if any
    pub async fn handle(
        &self,
        raw_query: Option<&str>,
        cookie_header: Option<&str>,
    ) -> Result<CredentialRecord, CallbackError> {
        // RECEIVED
        let query = CallbackQuery::parse(raw_query)?;

        // CSRF_CHECKED
        self.binder
            .validate(cookie_header, query.state.as_deref())
            .map_err(|e| {
                warn!(stage = CallbackStage::CsrfChecked.as_str(), reason = e.reason(), "CSRF validation failed");
                e
            })?;
        debug!(stage = CallbackStage::CsrfChecked.as_str(), "CSRF state validated");

        // CODE_VALIDATED
        if let Some(error) = query.error.filter(|e| !e.is_empty()) {
            let description = query.error_description.unwrap_or_default();
            warn!(error = %error, description = %description, "Provider reported authorization failure");
            return Err(CallbackError::AuthorizationDenied { error, description });
        }
        let code = query
            .code
            .filter(|c| !c.is_empty())
            .ok_or(CallbackError::MissingCode)?;
        debug!(stage = CallbackStage::CodeValidated.as_str(), granted_scopes = ?query.scopes, "Authorization code present");

        // EXCHANGED
        let request = self.exchange_request(&code)?;
        let token = self.provider.exchange_code(&request).await.map_err(|e| {
            warn!(
                target: "tokgate::exchange",
                stage = CallbackStage::Exchanged.as_str(),
                reason = e.reason(),
                error = %e,
                "Token exchange failed"
            );
            e
        })?;

        // EXPIRY_COMPUTED
        let record = credential_record(token, Utc::now());

        info!(
            stage = CallbackStage::ExpiryComputed.as_str(),
            has_refresh_token = !record.refresh_token.is_empty(),
            expires_at_epoch = record.expires_at_epoch,
            "Authorization code exchanged"
        );

        Ok(record)
    }

    fn exchange_request(&self, code: &str) -> Result<TokenExchangeRequest, ConfigError> {
        if self.client_key.is_empty() {
            return Err(ConfigError::Missing("oauth.client_key"));
        }
        if self.client_secret.is_empty() {
            return Err(ConfigError::Missing("oauth.client_secret"));
        }
        if self.redirect_uri.is_empty() {
            return Err(ConfigError::Missing("oauth.redirect_uri"));
        }
        Ok(TokenExchangeRequest::new(
            &self.client_key,
            &self.client_secret,
            code,
            &self.redirect_uri,
        ))
    }
}

/// `now + expires_in`; a missing or negative lifetime means already expired.
pub fn expires_at_epoch(now: DateTime<Utc>, expires_in: Option<i64>) -> i64 {
    now.timestamp()
        .saturating_add(expires_in.unwrap_or(0).max(0))
}

/// Project a token response onto the durable record, stamping expiry at `now`.
pub fn credential_record(token: TokenResponse, now: DateTime<Utc>) -> CredentialRecord {
    CredentialRecord {
        expires_at_epoch: expires_at_epoch(now, token.expires_in),
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        open_id: Some(token.open_id).filter(|id| !id.is_empty()),
    }
}
