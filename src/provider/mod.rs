//! Identity provider capability.
//!
//! [`AuthorizationProviderClient`] is the narrow seam around the two places
//! the flow touches the provider: the authorize endpoint the browser is sent
//! to and the token endpoint the code is exchanged at. The callback state
//! machine only ever sees this trait, so it runs against a fake in tests.

mod http;

pub use http::HttpProviderClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Form body POSTed to the token endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenExchangeRequest {
    pub client_key: String,
    pub client_secret: String,
    pub code: String,
    pub grant_type: &'static str,
    pub redirect_uri: String,
}

impl TokenExchangeRequest {
    pub const GRANT_TYPE: &'static str = "authorization_code";

    pub fn new(client_key: &str, client_secret: &str, code: &str, redirect_uri: &str) -> Self {
        Self {
            client_key: client_key.to_string(),
            client_secret: client_secret.to_string(),
            code: code.to_string(),
            grant_type: Self::GRANT_TYPE,
            redirect_uri: redirect_uri.to_string(),
        }
    }
}

/// Successful token endpoint response.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
    #[serde(default)]
    pub scope: String,
    /// Provider subject identifier
    #[serde(default)]
    pub open_id: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Why a code exchange failed. Never retried: the code is single-use.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Non-2xx from the token endpoint
    #[error("token endpoint rejected the exchange with status {status}")]
    Rejected { status: u16, body: String },

    /// 2xx carrying an OAuth error object instead of tokens
    #[error("provider returned error '{error}': {description}")]
    ProviderError {
        error: String,
        description: String,
        body: String,
    },

    #[error("token exchange timed out")]
    Timeout,

    #[error("token exchange request failed: {0}")]
    Transport(String),

    #[error("token endpoint returned an unreadable response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    /// Sub-reason for logs and client-facing messages
    pub fn reason(&self) -> &'static str {
        match self {
            ExchangeError::Rejected { .. } => "rejected",
            ExchangeError::ProviderError { .. } => "provider_error",
            ExchangeError::Timeout => "timeout",
            ExchangeError::Transport(_) => "transport",
            ExchangeError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// The provider as seen by the flow.
#[async_trait]
pub trait AuthorizationProviderClient: Send + Sync {
    /// Base URL the browser is redirected to for consent
    fn authorize_endpoint(&self) -> &str;

    /// Exchange a one-time authorization code for tokens. Exactly one
    /// request per call.
    async fn exchange_code(
        &self,
        request: &TokenExchangeRequest,
    ) -> Result<TokenResponse, ExchangeError>;
}

/// Interpret a 2xx token endpoint body.
///
/// Accepts a bare token object or one wrapped in a `data` envelope. A body
/// that carries an OAuth `error` and no `access_token` is an exchange failure
/// even though the status was 2xx.
pub fn parse_token_body(body: &str) -> Result<TokenResponse, ExchangeError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ExchangeError::InvalidResponse(format!("not JSON: {}", e)))?;

    let payload = match value.get("data") {
        Some(data) if data.is_object() && value.get("access_token").is_none() => data,
        _ => &value,
    };

    let access_token = payload
        .get("access_token")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());

    if access_token.is_none() {
        if let Some(error) = oauth_error(payload).or_else(|| oauth_error(&value)) {
            let (error, description) = error;
            return Err(ExchangeError::ProviderError {
                error,
                description,
                body: body.to_string(),
            });
        }
        return Err(ExchangeError::InvalidResponse(
            "missing access_token".to_string(),
        ));
    }

    serde_json::from_value(payload.clone())
        .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
}

/// `(error, error_description)` if the object carries a non-empty OAuth error.
fn oauth_error(value: &serde_json::Value) -> Option<(String, String)> {
    let error = value.get("error")?;
    let code = match error {
        serde_json::Value::String(s) if !s.is_empty() && s != "ok" => s.clone(),
        // Envelope style: {"error": {"code": "...", "message": "..."}}
        serde_json::Value::Object(obj) => {
            let code = obj.get("code").and_then(|c| c.as_str()).unwrap_or_default();
            if code.is_empty() || code == "ok" {
                return None;
            }
            let message = obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or_default();
            return Some((code.to_string(), message.to_string()));
        }
        _ => return None,
    };
    let description = value
        .get("error_description")
        .and_then(|d| d.as_str())
        .unwrap_or_default()
        .to_string();
    Some((code, description))
}
