//! HTTP surface.
//!
//! Three routes, all stateless between invocations:
//! 1. `ANY  /login` → 302 to the provider, state cookie set
//! 2. `GET  <callback-path>` → validate, exchange, persist, render; state cookie cleared
//! 3. `POST /save-tokens` → hand a credential record to the sink

mod render;

use crate::authorize::AuthorizationRequestBuilder;
use crate::callback::{CallbackError, CallbackExchanger};
use crate::config::{ConfigError, ResponseFormat, TokgateConfig};
use crate::credentials::{CredentialRecord, CredentialSink, PersistenceError};
use crate::csrf::CsrfStateBinder;
use crate::provider::{AuthorizationProviderClient, ExchangeError};
use crate::random::SecureRandomSource;
use axum::{
    body::{Body, Bytes},
    extract::{RawQuery, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, Request, StatusCode,
    },
    response::{Html, IntoResponse, Json, Response},
    routing::{any, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Body returned to clients on any CSRF failure
const CSRF_FAILURE_BODY: &str = "Invalid CSRF state";

/// Persistence handoff response
#[derive(Serialize)]
struct SaveResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Successful callback body
#[derive(Serialize)]
struct CallbackSuccess<'a> {
    success: bool,
    persisted: bool,
    credential: &'a CredentialRecord,
}

/// Application error types for the OAuth endpoints
#[derive(Debug)]
pub enum ApiError {
    Configuration(ConfigError),
    Callback(CallbackError),
    Persistence(PersistenceError),
    InvalidBody(String),
}

impl From<CallbackError> for ApiError {
    fn from(e: CallbackError) -> Self {
        match e {
            CallbackError::Configuration(e) => ApiError::Configuration(e),
            other => ApiError::Callback(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Configuration(e) => {
                error!(error = %e, "OAuth is not configured");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Server misconfigured: {}", e))
                    .into_response()
            }
            ApiError::Callback(CallbackError::Csrf(_)) => {
                (StatusCode::BAD_REQUEST, CSRF_FAILURE_BODY).into_response()
            }
            ApiError::Callback(CallbackError::Exchange(e)) => exchange_failure(e),
            ApiError::Callback(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            ApiError::Persistence(e) => {
                let status = match e {
                    PersistenceError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    Json(SaveResponse {
                        success: false,
                        error: Some(e.to_string()),
                    }),
                )
                    .into_response()
            }
            ApiError::InvalidBody(message) => (
                StatusCode::BAD_REQUEST,
                Json(SaveResponse {
                    success: false,
                    error: Some(message),
                }),
            )
                .into_response(),
        }
    }
}

/// Provider status and body go back verbatim; local failures get gateway codes.
fn exchange_failure(e: ExchangeError) -> Response {
    match e {
        ExchangeError::Rejected { status, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            provider_body(status, body)
        }
        ExchangeError::ProviderError { body, .. } => provider_body(StatusCode::BAD_REQUEST, body),
        ExchangeError::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            "token exchange failed: timeout".to_string(),
        )
            .into_response(),
        other => (
            StatusCode::BAD_GATEWAY,
            format!("token exchange failed: {}", other.reason()),
        )
            .into_response(),
    }
}

fn provider_body(status: StatusCode, body: String) -> Response {
    let content_type = if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };
    (status, [(CONTENT_TYPE, content_type)], body).into_response()
}

/// Shared, immutable state for the OAuth routes
pub struct OAuthAppState {
    pub builder: AuthorizationRequestBuilder,
    pub exchanger: CallbackExchanger,
    pub provider: Arc<dyn AuthorizationProviderClient>,
    pub sink: Arc<dyn CredentialSink>,
    pub response_format: ResponseFormat,
    pub persist_on_callback: bool,
    pub login_path: String,
    pub callback_path: String,
    pub save_tokens_path: String,
}

impl OAuthAppState {
    pub fn new(
        config: &TokgateConfig,
        provider: Arc<dyn AuthorizationProviderClient>,
        sink: Arc<dyn CredentialSink>,
        random: Arc<dyn SecureRandomSource>,
    ) -> Self {
        let callback_path = config.oauth.callback_path();
        let binder = CsrfStateBinder::new(
            config.csrf.cookie_name.clone(),
            callback_path.clone(),
            config.csrf.max_age_seconds,
        );

        Self {
            builder: AuthorizationRequestBuilder::new(&config.oauth, random),
            exchanger: CallbackExchanger::new(&config.oauth, binder, Arc::clone(&provider)),
            provider,
            sink,
            response_format: config.server.response_format,
            persist_on_callback: config.server.persist_on_callback,
            login_path: config.server.login_path.clone(),
            callback_path,
            save_tokens_path: config.server.save_tokens_path.clone(),
        }
    }
}

/// Create the OAuth router
pub fn create_router(state: OAuthAppState) -> Router {
    let login_path = state.login_path.clone();
    let callback_path = state.callback_path.clone();
    let save_tokens_path = state.save_tokens_path.clone();

    Router::new()
        .route(&login_path, any(oauth_login))
        .route(&callback_path, get(oauth_callback))
        .route(&save_tokens_path, post(save_tokens))
        .layer(
            // Path only: the query carries the code and state
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path()
                )
            }),
        )
        .with_state(Arc::new(state))
}

/// ANY /login
///
/// Mints a state token, sets it as a cookie scoped to the callback path and
/// redirects to the provider consent page.
async fn oauth_login(State(state): State<Arc<OAuthAppState>>) -> Result<Response, ApiError> {
    let request = state.builder.build().map_err(ApiError::Configuration)?;
    let location = request.authorization_url(state.provider.authorize_endpoint());
    let cookie = state.exchanger.binder().bind(&request.state);

    info!(scopes = %request.scope_param(), "Redirecting to OAuth provider");

    Ok((
        StatusCode::FOUND,
        [
            (LOCATION, location),
            (SET_COOKIE, cookie),
            (CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response())
}

/// GET <callback-path>
///
/// Every response, success or failure, expires the state cookie: the token
/// is single-use once presented.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let cookies = cookie_header(&headers);

    let response = match state
        .exchanger
        .handle(query.as_deref(), cookies.as_deref())
        .await
    {
        Ok(record) => complete(&state, record).await,
        Err(e) => {
            if !matches!(e, CallbackError::Exchange(_)) {
                warn!(stage = e.stage().as_str(), error = %e, "OAuth callback rejected");
            }
            ApiError::from(e).into_response()
        }
    };

    clear_state_cookie(response, state.exchanger.binder())
}

async fn complete(state: &OAuthAppState, record: CredentialRecord) -> Response {
    let persisted = if state.persist_on_callback {
        if let Err(e) = state.sink.persist(&record).await {
            error!(
                target: "tokgate::persistence",
                error = %e,
                "Failed to persist credentials after successful exchange"
            );
            return ApiError::Persistence(e).into_response();
        }
        true
    } else {
        false
    };

    info!(persisted, "OAuth flow completed");

    match state.response_format {
        ResponseFormat::Json => Json(CallbackSuccess {
            success: true,
            persisted,
            credential: &record,
        })
        .into_response(),
        ResponseFormat::Page => {
            Html(render::credential_page(&record, persisted, &state.save_tokens_path)).into_response()
        }
    }
}

fn clear_state_cookie(mut response: Response, binder: &CsrfStateBinder) -> Response {
    match HeaderValue::from_str(&binder.clear()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
            response.headers_mut().insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) => {
            error!(error = %e, "State cookie cannot be encoded as a header");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// All `Cookie` headers joined; HTTP/2 clients may split them.
fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join("; "))
    }
}

/// POST /save-tokens
///
/// Accepts `{accessToken, refreshToken, expiresAtEpoch}` and hands it to
/// the sink.
async fn save_tokens(
    State(state): State<Arc<OAuthAppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record: CredentialRecord = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidBody(format!("invalid credential record: {}", e)))?;

    state.sink.persist(&record).await.map_err(|e| {
        error!(target: "tokgate::persistence", error = %e, "Failed to save tokens");
        ApiError::Persistence(e)
    })?;

    info!(has_refresh_token = !record.refresh_token.is_empty(), "Tokens saved");

    Ok(Json(serde_json::json!({ "success": true })))
}
