// Integration tests for the login → callback round-trip

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokgate::api::{create_router, OAuthAppState};
use tokgate::config::{ResponseFormat, TokgateConfig};
use tokgate::credentials::{CredentialRecord, CredentialSink, JsonFileSink, PersistenceError};
use tokgate::provider::{
    AuthorizationProviderClient, ExchangeError, TokenExchangeRequest, TokenResponse,
};
use tokgate::random::SecureRandomSource;
use tower::ServiceExt;

const STATE: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE";

/// Provider double counting exchange invocations
struct FakeProvider {
    result: Result<TokenResponse, ExchangeError>,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn ok() -> Arc<Self> {
        Self::returning(Ok(TokenResponse {
            access_token: "AT".to_string(),
            refresh_token: "RT".to_string(),
            expires_in: Some(3600),
            refresh_expires_in: Some(86400),
            scope: "user.info.basic,video.upload".to_string(),
            open_id: "oid".to_string(),
            token_type: Some("Bearer".to_string()),
        }))
    }

    fn returning(result: Result<TokenResponse, ExchangeError>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationProviderClient for FakeProvider {
    fn authorize_endpoint(&self) -> &str {
        "https://provider.example/v2/auth/authorize/"
    }

    async fn exchange_code(
        &self,
        _request: &TokenExchangeRequest,
    ) -> Result<TokenResponse, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Always yields 0x01 bytes, so the state is [`STATE`]
struct FixedRandom;

impl SecureRandomSource for FixedRandom {
    fn fill(&self, dest: &mut [u8]) {
        dest.fill(1);
    }
}

struct FailingSink;

#[async_trait]
impl CredentialSink for FailingSink {
    async fn persist(&self, _record: &CredentialRecord) -> Result<(), PersistenceError> {
        Err(PersistenceError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        )))
    }
}

fn config() -> TokgateConfig {
    let mut config = TokgateConfig::default();
    config.oauth.client_key = "test_client_key".to_string();
    config.oauth.client_secret = "test_secret".to_string();
    config.oauth.redirect_uri = "https://example.com/oauth/callback".to_string();
    config.oauth.scopes = vec!["a".to_string(), "b".to_string()];
    config.csrf.max_age_seconds = 120;
    config
}

fn app(config: &TokgateConfig, provider: Arc<FakeProvider>, sink: Arc<dyn CredentialSink>) -> Router {
    let state = OAuthAppState::new(config, provider, sink, Arc::new(FixedRandom));
    create_router(state)
}

fn file_sink(dir: &tempfile::TempDir) -> Arc<JsonFileSink> {
    Arc::new(JsonFileSink::new(dir.path().join("token.json")))
}

async fn body_string(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn callback(query: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(format!("/oauth/callback?{}", query));
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_login_redirects_with_state_cookie() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&config(), FakeProvider::ok(), file_sink(&dir));

    let response = app
        .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert_eq!(
        location,
        format!(
            "https://provider.example/v2/auth/authorize/?client_key=test_client_key&response_type=code&scope=a%2Cb&redirect_uri=https%3A%2F%2Fexample.com%2Foauth%2Fcallback&state={}",
            STATE
        )
    );

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert_eq!(
        cookies[0],
        format!(
            "csrfState={}; Max-Age=120; Path=/oauth/callback; HttpOnly; Secure; SameSite=Lax",
            STATE
        )
    );
}

#[tokio::test]
async fn test_login_accepts_any_method() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&config(), FakeProvider::ok(), file_sink(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_login_without_client_key_is_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.oauth.client_key = String::new();
    let app = app(&config, FakeProvider::ok(), file_sink(&dir));

    let response = app
        .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(header::LOCATION).is_none());
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn test_full_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let sink = file_sink(&dir);
    let provider = FakeProvider::ok();
    let app = app(&config(), provider.clone(), sink.clone());

    // Leg 1: login
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let set_cookie = set_cookies(&response).remove(0);
    let cookie_pair = set_cookie.split(';').next().unwrap().to_string();

    // Leg 2: provider redirects back with the echoed state
    let before = chrono::Utc::now().timestamp();
    let response = app
        .oneshot(callback(
            &format!("code=auth-code&state={}&scopes=a%2Cb", STATE),
            Some(&format!("theme=dark; {}; other=xyz", cookie_pair)),
        ))
        .await
        .unwrap();
    let after = chrono::Utc::now().timestamp();

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("csrfState=;"));
    assert!(cookies[0].contains("Max-Age=0"));

    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["persisted"], true);
    assert_eq!(json["credential"]["accessToken"], "AT");
    assert_eq!(json["credential"]["refreshToken"], "RT");
    let expires = json["credential"]["expiresAtEpoch"].as_i64().unwrap();
    assert!(expires >= before + 3600 && expires <= after + 3600);

    assert_eq!(provider.calls(), 1);

    let stored = sink.load().await.unwrap().unwrap();
    assert_eq!(stored.access_token, "AT");
    assert_eq!(stored.expires_at_epoch, expires);
    assert_eq!(stored.open_id.as_deref(), Some("oid"));
}

#[tokio::test]
async fn test_surrounding_cookies_do_not_matter() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FakeProvider::ok();
    let app = app(&config(), provider.clone(), file_sink(&dir));

    let response = app
        .oneshot(callback("code=c&state=abc", Some("csrfState=abc; other=xyz")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_csrf_failure_is_plain_400_without_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FakeProvider::ok();
    let app = app(&config(), provider.clone(), file_sink(&dir));

    for cookie in [None, Some(""), Some("other=xyz"), Some("csrfState=abd"), Some("csrfState=ABC")] {
        let response = app
            .clone()
            .oneshot(callback("code=c&state=abc", cookie))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(set_cookies(&response)[0].contains("Max-Age=0"));
        assert_eq!(body_string(response).await, "Invalid CSRF state");
    }

    assert_eq!(provider.calls(), 0);
    assert!(!dir.path().join("token.json").exists());
}

#[tokio::test]
async fn test_empty_code_never_reaches_provider() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FakeProvider::ok();
    let app = app(&config(), provider.clone(), file_sink(&dir));

    let response = app
        .oneshot(callback("code=&state=abc", Some("csrfState=abc")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "missing authorization code");
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_provider_401_is_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FakeProvider::returning(Err(ExchangeError::Rejected {
        status: 401,
        body: r#"{"error":"invalid_client","error_description":"Client key is invalid"}"#.to_string(),
    }));
    let app = app(&config(), provider.clone(), file_sink(&dir));

    let response = app
        .oneshot(callback("code=c&state=abc", Some("csrfState=abc")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&response)[0].contains("Max-Age=0"));
    assert_eq!(
        body_string(response).await,
        r#"{"error":"invalid_client","error_description":"Client key is invalid"}"#
    );
    assert_eq!(provider.calls(), 1);
    assert!(!dir.path().join("token.json").exists());
}

#[tokio::test]
async fn test_exchange_timeout_is_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FakeProvider::returning(Err(ExchangeError::Timeout));
    let app = app(&config(), provider, file_sink(&dir));

    let response = app
        .oneshot(callback("code=c&state=abc", Some("csrfState=abc")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(body_string(response).await.contains("timeout"));
}

#[tokio::test]
async fn test_persistence_failure_is_distinct() {
    let provider = FakeProvider::ok();
    let app = app(&config(), provider.clone(), Arc::new(FailingSink));

    let response = app
        .oneshot(callback("code=c&state=abc", Some("csrfState=abc")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookies(&response)[0].contains("Max-Age=0"));

    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("read-only filesystem"));
    // The exchange itself succeeded
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_replayed_callback_clears_cookie_again() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FakeProvider::returning(Err(ExchangeError::Rejected {
        status: 400,
        body: r#"{"error":"invalid_grant"}"#.to_string(),
    }));
    let app = app(&config(), provider, file_sink(&dir));

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(callback("code=used&state=abc", Some("csrfState=abc")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            set_cookies(&response),
            vec!["csrfState=; Max-Age=0; Path=/oauth/callback; HttpOnly; Secure; SameSite=Lax".to_string()]
        );
    }
}

#[tokio::test]
async fn test_page_response_format() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.server.response_format = ResponseFormat::Page;
    config.server.persist_on_callback = false;
    let app = app(&config, FakeProvider::ok(), file_sink(&dir));

    let response = app
        .oneshot(callback("code=c&state=abc", Some("csrfState=abc")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert!(set_cookies(&response)[0].contains("Max-Age=0"));

    let page = body_string(response).await;
    assert!(page.contains("&quot;accessToken&quot;: &quot;AT&quot;"));
    assert!(page.contains("&quot;refreshToken&quot;: &quot;RT&quot;"));
    assert!(page.contains("expiresAtEpoch"));
    // Not persisted on callback
    assert!(!dir.path().join("token.json").exists());
}

#[tokio::test]
async fn test_callback_rejects_post() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&config(), FakeProvider::ok(), file_sink(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/oauth/callback?code=c&state=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_callback_path_follows_redirect_uri() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.oauth.redirect_uri = "https://example.github.io/automator/oauth/callback".to_string();
    let app = app(&config, FakeProvider::ok(), file_sink(&dir));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(set_cookies(&response)[0].contains("Path=/automator/oauth/callback;"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/automator/oauth/callback?code=c&state=abc")
                .header(header::COOKIE, "csrfState=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
