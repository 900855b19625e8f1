use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokgate::api::{create_router, OAuthAppState};
use tokgate::config::{StorageBackend, TokgateConfig};
use tokgate::credentials::{CredentialSink, EncryptedSqliteSink, JsonFileSink};
use tokgate::provider::HttpProviderClient;
use tokgate::random::OsRandom;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokgate=info,tower_http=info".into()),
        )
        .init();

    info!("tokgate starting...");

    let config = TokgateConfig::load().context("Failed to load configuration")?;

    let missing = config.oauth.missing_credentials();
    if !missing.is_empty() {
        // Keep serving: affected invocations answer 500
        error!(missing = ?missing, "OAuth client is not fully configured");
    }

    info!(
        bind_addr = %config.server.bind_addr,
        callback_path = %config.oauth.callback_path(),
        state_max_age_seconds = config.csrf.max_age_seconds,
        storage = ?config.storage.backend,
        response_format = ?config.server.response_format,
        "Configuration loaded"
    );

    let provider = Arc::new(
        HttpProviderClient::new(
            config.oauth.authorize_url.clone(),
            config.oauth.token_url.clone(),
            Duration::from_secs(config.oauth.exchange_timeout_seconds),
        )
        .context("Failed to build provider HTTP client")?,
    );

    let sink: Arc<dyn CredentialSink> = match config.storage.backend {
        StorageBackend::File => {
            info!(path = %config.storage.path.display(), "Using JSON file credential sink");
            Arc::new(JsonFileSink::new(config.storage.path.clone()))
        }
        StorageBackend::Sqlite => {
            let key = config
                .storage
                .encryption_key
                .as_deref()
                .context("TOKGATE_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
            info!(db_path = %config.storage.db_path.display(), "Using encrypted SQLite credential sink");
            Arc::new(
                EncryptedSqliteSink::new(&config.storage.db_path, key)
                    .context("Failed to initialize credential store")?,
            )
        }
    };

    let state = OAuthAppState::new(&config, provider, sink, Arc::new(OsRandom));
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "tokgate listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    info!("tokgate stopped");
    Ok(())
}
