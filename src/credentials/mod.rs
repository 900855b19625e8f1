//! Credential records and the sinks that persist them.
//!
//! The callback hands a finished [`CredentialRecord`] to a
//! [`CredentialSink`] and keeps nothing. A sink failure is a
//! [`PersistenceError`], a different failure domain from a token exchange
//! failure: the tokens were issued, they just could not be stored.
//!
//! Two sinks are provided:
//!
//! ```text
//! JsonFileSink          ~/.tiktok_token.json, read by the upload scripts
//! EncryptedSqliteSink   AES-256-GCM per token, SQLite upsert by open_id
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod encryption;
mod file;
mod sqlite;

pub use encryption::TokenCipher;
pub use file::JsonFileSink;
pub use sqlite::EncryptedSqliteSink;

/// Durable projection of a token response.
///
/// Serialised camelCase; the snake_case names written by the upload scripts
/// are accepted on input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    #[serde(alias = "access_token")]
    pub access_token: String,

    #[serde(default, alias = "refresh_token")]
    pub refresh_token: String,

    /// Unix seconds at which the access token expires
    #[serde(alias = "expires_at", alias = "expires_at_epoch")]
    pub expires_at_epoch: i64,

    /// Provider subject the tokens belong to
    #[serde(default, alias = "open_id", skip_serializing_if = "Option::is_none")]
    pub open_id: Option<String>,
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("credential record is invalid: {0}")]
    InvalidRecord(String),

    #[error("failed to write credential file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize credential record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("credential database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("credential encryption failed: {0}")]
    Encryption(String),

    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Accepts finished credential records.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    /// Persist `record`, replacing any earlier credential for the same subject.
    async fn persist(&self, record: &CredentialRecord) -> Result<(), PersistenceError>;
}

impl CredentialRecord {
    /// Reject records no consumer could use.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.access_token.trim().is_empty() {
            return Err(PersistenceError::InvalidRecord(
                "accessToken must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
