//! Encrypted credential storage using SQLite.

use super::{encryption::Sealed, CredentialRecord, CredentialSink, PersistenceError, TokenCipher};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Subject key used when the provider did not return an `open_id`.
const DEFAULT_SUBJECT: &str = "default";

/// Credential sink backed by SQLite with tokens sealed by [`TokenCipher`].
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     open_id TEXT PRIMARY KEY,
///     access_token TEXT NOT NULL,        -- sealed
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT NOT NULL,       -- sealed
///     refresh_token_nonce TEXT NOT NULL,
///     expires_at_epoch INTEGER NOT NULL,
///     updated_at TEXT NOT NULL           -- RFC 3339
/// );
/// ```
///
/// Clones share one connection.
#[derive(Clone)]
pub struct EncryptedSqliteSink {
    conn: Arc<Mutex<Connection>>,
    cipher: TokenCipher,
}

impl EncryptedSqliteSink {
    /// Open or create the database at `db_path`.
    ///
    /// # Arguments
    /// * `db_path` - SQLite file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self, PersistenceError> {
        let cipher = TokenCipher::from_base64(encryption_key)
            .map_err(|e| PersistenceError::Encryption(e.to_string()))?;

        let conn = Connection::open(db_path)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                open_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                refresh_token_nonce TEXT NOT NULL,
                expires_at_epoch INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
        })
    }

    fn seal(&self, token: &str) -> Result<Sealed, PersistenceError> {
        self.cipher
            .seal(token)
            .map_err(|e| PersistenceError::Encryption(e.to_string()))
    }

    fn open(&self, ciphertext: String, nonce: String) -> Result<String, PersistenceError> {
        self.cipher
            .open(&Sealed { ciphertext, nonce })
            .map_err(|e| PersistenceError::Encryption(e.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|_| PersistenceError::Unavailable("credential store lock poisoned".to_string()))
    }

    /// Store `record`, replacing any credential for the same subject.
    pub fn store(&self, record: &CredentialRecord) -> Result<(), PersistenceError> {
        record.validate()?;
        let access = self.seal(&record.access_token)?;
        let refresh = self.seal(&record.refresh_token)?;
        let subject = record.open_id.as_deref().unwrap_or(DEFAULT_SUBJECT);

        self.lock()?.execute(
            r#"
            INSERT INTO credentials (
                open_id,
                access_token, access_token_nonce,
                refresh_token, refresh_token_nonce,
                expires_at_epoch, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(open_id) DO UPDATE SET
                access_token = excluded.access_token,
                access_token_nonce = excluded.access_token_nonce,
                refresh_token = excluded.refresh_token,
                refresh_token_nonce = excluded.refresh_token_nonce,
                expires_at_epoch = excluded.expires_at_epoch,
                updated_at = excluded.updated_at
            "#,
            params![
                subject,
                access.ciphertext,
                access.nonce,
                refresh.ciphertext,
                refresh.nonce,
                record.expires_at_epoch,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Most recently stored credential, decrypted.
    pub fn latest(&self) -> Result<Option<CredentialRecord>, PersistenceError> {
        let row = self
            .lock()?
            .query_row(
                r#"
                SELECT open_id, access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce, expires_at_epoch
                FROM credentials
                ORDER BY updated_at DESC, rowid DESC
                LIMIT 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((open_id, access, access_nonce, refresh, refresh_nonce, expires_at_epoch)) = row
        else {
            return Ok(None);
        };

        Ok(Some(CredentialRecord {
            access_token: self.open(access, access_nonce)?,
            refresh_token: self.open(refresh, refresh_nonce)?,
            expires_at_epoch,
            open_id: (open_id != DEFAULT_SUBJECT).then_some(open_id),
        }))
    }

    /// Number of stored subjects
    pub fn count(&self) -> Result<usize, PersistenceError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl CredentialSink for EncryptedSqliteSink {
    async fn persist(&self, record: &CredentialRecord) -> Result<(), PersistenceError> {
        let sink = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || sink.store(&record))
            .await
            .map_err(|e| PersistenceError::Unavailable(format!("credential store task failed: {}", e)))?
    }
}
