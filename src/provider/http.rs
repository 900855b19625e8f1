//! reqwest-backed provider client.

use super::{parse_token_body, AuthorizationProviderClient, ExchangeError, TokenExchangeRequest, TokenResponse};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Talks to the real authorize and token endpoints.
#[derive(Clone, Debug)]
pub struct HttpProviderClient {
    client: reqwest::Client,
    authorize_url: String,
    token_url: String,
}

impl HttpProviderClient {
    /// # Arguments
    /// * `authorize_url` - Consent page the browser is redirected to
    /// * `token_url` - Token exchange endpoint
    /// * `timeout` - Bound on a whole exchange request
    pub fn new(
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        // Redirects are answered as rejections, never followed with the secret
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ExchangeError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
        })
    }
}

#[async_trait]
impl AuthorizationProviderClient for HttpProviderClient {
    fn authorize_endpoint(&self) -> &str {
        &self.authorize_url
    }

    async fn exchange_code(
        &self,
        request: &TokenExchangeRequest,
    ) -> Result<TokenResponse, ExchangeError> {
        debug!(token_url = %self.token_url, "Exchanging authorization code for token");

        let response = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .header("Cache-Control", "no-cache")
            .form(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if !status.is_success() {
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token = parse_token_body(&body)?;

        debug!(
            has_refresh_token = !token.refresh_token.is_empty(),
            expires_in = ?token.expires_in,
            "Token exchange successful"
        );

        Ok(token)
    }
}

fn classify(error: reqwest::Error) -> ExchangeError {
    if error.is_timeout() {
        ExchangeError::Timeout
    } else {
        ExchangeError::Transport(error.to_string())
    }
}
