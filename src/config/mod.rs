//! Service configuration.
//!
//! Values come from an optional TOML file (`TOKGATE_CONFIG`) and are then
//! overridden by environment variables. Client credentials are deliberately
//! not checked at load time: a deployment with a missing client key still
//! starts, and every invocation that needs the key answers 500.

use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Upper bound on the CSRF window. Anything above it is rejected.
pub const MAX_STATE_MAX_AGE_SECONDS: u64 = 300;

/// Below this the user may not finish logging in before the cookie expires.
pub const MIN_RECOMMENDED_MAX_AGE_SECONDS: u64 = 60;

const DEFAULT_CALLBACK_PATH: &str = "/oauth/callback";

/// Configuration errors. Always a deployment fault, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Complete tokgate configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokgateConfig {
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub csrf: CsrfConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Provider endpoints and client registration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_key: String,
    #[serde(default)]
    pub client_secret: String,
    /// Absolute URI registered with the provider
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Bound on the token exchange request (seconds)
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_seconds: u64,
}

fn default_authorize_url() -> String {
    "https://www.tiktok.com/v2/auth/authorize/".to_string()
}

fn default_token_url() -> String {
    "https://open.tiktokapis.com/v2/oauth/token/".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["user.info.basic".to_string(), "video.upload".to_string()]
}

fn default_exchange_timeout() -> u64 {
    10
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_key: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            exchange_timeout_seconds: default_exchange_timeout(),
        }
    }
}

impl OAuthSettings {
    /// Path component of the redirect URI; the state cookie is scoped to it.
    pub fn callback_path(&self) -> String {
        Url::parse(&self.redirect_uri)
            .ok()
            .map(|url| url.path().to_string())
            .filter(|path| path.len() > 1)
            .unwrap_or_else(|| DEFAULT_CALLBACK_PATH.to_string())
    }

    /// Names of the client settings that are still empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_key.trim().is_empty() {
            missing.push("oauth.client_key");
        }
        if self.client_secret.trim().is_empty() {
            missing.push("oauth.client_secret");
        }
        if self.redirect_uri.trim().is_empty() {
            missing.push("oauth.redirect_uri");
        }
        missing
    }
}

/// CSRF cookie settings
#[derive(Debug, Clone, Deserialize)]
pub struct CsrfConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Authentication window in seconds
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
}

fn default_cookie_name() -> String {
    "csrfState".to_string()
}

fn default_max_age() -> u64 {
    300
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            max_age_seconds: default_max_age(),
        }
    }
}

/// How the callback hands the credential back to the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// `{"success": true, "credential": {...}}`
    #[default]
    Json,
    /// HTML page showing the credential for manual copy
    Page,
}

impl std::str::FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "page" | "html" => Ok(ResponseFormat::Page),
            other => Err(format!("unknown response format '{}'", other)),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_save_tokens_path")]
    pub save_tokens_path: String,
    #[serde(default)]
    pub response_format: ResponseFormat,
    /// Hand the record to the sink before rendering the callback response
    #[serde(default = "default_persist_on_callback")]
    pub persist_on_callback: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_save_tokens_path() -> String {
    "/save-tokens".to_string()
}

fn default_persist_on_callback() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            login_path: default_login_path(),
            save_tokens_path: default_save_tokens_path(),
            response_format: ResponseFormat::default(),
            persist_on_callback: default_persist_on_callback(),
        }
    }
}

/// Credential sink backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Plain JSON file
    #[default]
    File,
    /// AES-256-GCM encrypted SQLite database
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Credential storage settings
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_credentials_path")]
    pub path: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Base64-encoded 32-byte key, environment only
    #[serde(skip)]
    pub encryption_key: Option<String>,
}

fn default_credentials_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tiktok_token.json")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("credentials.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_credentials_path(),
            db_path: default_db_path(),
            encryption_key: None,
        }
    }
}

impl TokgateConfig {
    /// Load from `TOKGATE_CONFIG` (if set) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("TOKGATE_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TIKTOK_CLIENT_KEY") {
            self.oauth.client_key = v;
        }
        if let Some(v) = lookup("TIKTOK_CLIENT_SECRET") {
            self.oauth.client_secret = v;
        }
        if let Some(v) = lookup("TIKTOK_REDIRECT_URI") {
            self.oauth.redirect_uri = v;
        }
        if let Some(v) = lookup("TIKTOK_AUTHORIZE_URL") {
            self.oauth.authorize_url = v;
        }
        if let Some(v) = lookup("TIKTOK_TOKEN_URL") {
            self.oauth.token_url = v;
        }
        if let Some(v) = lookup("TIKTOK_SCOPES") {
            self.oauth.scopes = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("TOKGATE_EXCHANGE_TIMEOUT_SECONDS") {
            self.oauth.exchange_timeout_seconds =
                parse_env("TOKGATE_EXCHANGE_TIMEOUT_SECONDS", "oauth.exchange_timeout_seconds", &v)?;
        }
        if let Some(v) = lookup("TOKGATE_STATE_COOKIE") {
            self.csrf.cookie_name = v;
        }
        if let Some(v) = lookup("TOKGATE_STATE_MAX_AGE") {
            self.csrf.max_age_seconds = parse_env("TOKGATE_STATE_MAX_AGE", "csrf.max_age_seconds", &v)?;
        }
        if let Some(v) = lookup("TOKGATE_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("TOKGATE_RESPONSE_FORMAT") {
            self.server.response_format =
                parse_env("TOKGATE_RESPONSE_FORMAT", "server.response_format", &v)?;
        }
        if let Some(v) = lookup("TOKGATE_STORAGE") {
            self.storage.backend = parse_env("TOKGATE_STORAGE", "storage.backend", &v)?;
        }
        if let Some(v) = lookup("TOKGATE_CREDENTIALS_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOKGATE_CREDENTIALS_DB") {
            self.storage.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOKGATE_ENCRYPTION_KEY") {
            self.storage.encryption_key = Some(v);
        }
        Ok(())
    }

    /// Reject structurally broken configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_age = self.csrf.max_age_seconds;
        if max_age == 0 || max_age > MAX_STATE_MAX_AGE_SECONDS {
            return Err(ConfigError::Invalid {
                name: "csrf.max_age_seconds",
                reason: format!(
                    "must be between 1 and {} seconds, got {}",
                    MAX_STATE_MAX_AGE_SECONDS, max_age
                ),
            });
        }
        if max_age < MIN_RECOMMENDED_MAX_AGE_SECONDS {
            warn!(
                max_age_seconds = max_age,
                "CSRF window is shorter than {} seconds; logins may expire mid-flow",
                MIN_RECOMMENDED_MAX_AGE_SECONDS
            );
        }

        if !is_cookie_token(&self.csrf.cookie_name) {
            return Err(ConfigError::Invalid {
                name: "csrf.cookie_name",
                reason: format!("'{}' is not a valid cookie name", self.csrf.cookie_name),
            });
        }

        if self.oauth.exchange_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                name: "oauth.exchange_timeout_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }

        let callback_path = self.oauth.callback_path();
        for (name, path) in [
            ("server.login_path", &self.server.login_path),
            ("server.save_tokens_path", &self.server.save_tokens_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("'{}' must start with '/'", path),
                });
            }
            if *path == callback_path {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("'{}' collides with the callback path", path),
                });
            }
        }
        if self.server.login_path == self.server.save_tokens_path {
            return Err(ConfigError::Invalid {
                name: "server.save_tokens_path",
                reason: "must differ from server.login_path".to_string(),
            });
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.encryption_key.is_none() {
            return Err(ConfigError::Missing("TOKGATE_ENCRYPTION_KEY"));
        }

        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TokgateConfig, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_env<T>(var: &str, name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("{}={}: {}", var, value, e),
    })
}

/// RFC 6265 cookie-name token: visible ASCII minus separators.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
        })
}
