//! Authorization leg: mint a state token and build the provider redirect.

use crate::config::{ConfigError, OAuthSettings};
use crate::random::{generate_state_token, SecureRandomSource};
use reqwest::Url;
use std::sync::Arc;


/// One authorization attempt. Lives only until the redirect is emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_key: String,
    pub redirect_uri: String,
    /// Ordered, deduplicated; comma-joined on the wire
    pub scopes: Vec<String>,
    pub state: String,
}

impl AuthorizationRequest {
    /// Comma-joined scope list, as the provider expects it.
    pub fn scope_param(&self) -> String {
        self.scopes.join(",")
    }

    /// Full authorization URL rooted at `authorize_endpoint`.
    ///
    /// Every value is percent-encoded on its own; the endpoint may already
    /// carry a query string.
    pub fn authorization_url(&self, authorize_endpoint: &str) -> String {
        let separator = if authorize_endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}client_key={}&response_type=code&scope={}&redirect_uri={}&state={}",
            authorize_endpoint,
            separator,
            urlencoding::encode(&self.client_key),
            urlencoding::encode(&self.scope_param()),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.state)
        )
    }
}

/// Builds [`AuthorizationRequest`]s from the client registration.
///
/// Holds no per-attempt state; the CSRF binding is carried entirely by the
/// cookie the caller sets from [`AuthorizationRequest::state`].
#[derive(Clone)]
pub struct AuthorizationRequestBuilder {
    client_key: String,
    redirect_uri: String,
    scopes: Vec<String>,
    random: Arc<dyn SecureRandomSource>,
}

impl AuthorizationRequestBuilder {
    pub fn new(settings: &OAuthSettings, random: Arc<dyn SecureRandomSource>) -> Self {
        Self {
            client_key: settings.client_key.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            scopes: settings.scopes.clone(),
            random,
        }
    }

    /// Validate the registration and mint a fresh request.
    ///
    /// # Errors
    /// `ConfigError` when the client key, redirect URI or scopes are missing,
    /// or the redirect URI is not absolute.
    pub fn build(&self) -> Result<AuthorizationRequest, ConfigError> {
        let client_key = self.client_key.trim();
        if client_key.is_empty() {
            return Err(ConfigError::Missing("oauth.client_key"));
        }

        let redirect_uri = self.redirect_uri.trim();
        if redirect_uri.is_empty() {
            return Err(ConfigError::Missing("oauth.redirect_uri"));
        }
        validate_redirect_uri(redirect_uri)?;

        let scopes = normalize_scopes(&self.scopes);
        if scopes.is_empty() {
            return Err(ConfigError::Missing("oauth.scopes"));
        }

        Ok(AuthorizationRequest {
            client_key: client_key.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scopes,
            state: generate_state_token(self.random.as_ref()),
        })
    }
}

fn validate_redirect_uri(redirect_uri: &str) -> Result<(), ConfigError> {
    let url = Url::parse(redirect_uri).map_err(|e| ConfigError::Invalid {
        name: "oauth.redirect_uri",
        reason: format!("'{}' is not an absolute URI: {}", redirect_uri, e),
    })?;

    if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
        return Err(ConfigError::Invalid {
            name: "oauth.redirect_uri",
            reason: format!("'{}' must be an http(s) URI with a host", redirect_uri),
        });
    }

    Ok(())
}

/// Trim, drop empties and duplicates, keep first-seen order.
fn normalize_scopes(scopes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let scope = scope.trim();
        if !scope.is_empty() && !out.iter().any(|s| s == scope) {
            out.push(scope.to_string());
        }
    }
    out
}
