//! Plain JSON file sink.

use super::{CredentialRecord, CredentialSink, PersistenceError};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes the record as pretty JSON to a single file, replacing it whole.
///
/// The file is written next to its destination and renamed into place, so
/// readers never observe a half-written credential. On unix it is created
/// with mode 0600.
#[derive(Clone, Debug)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored record back, if any.
    pub async fn load(&self) -> Result<Option<CredentialRecord>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialSink for JsonFileSink {
    async fn persist(&self, record: &CredentialRecord) -> Result<(), PersistenceError> {
        record.validate()?;
        let json = serde_json::to_vec_pretty(record)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_file(&path, &json))
            .await
            .map_err(|e| PersistenceError::Unavailable(format!("credential writer task failed: {}", e)))??;

        debug!(path = %self.path.display(), "Credential file written");
        Ok(())
    }
}

/// Write `contents` to a fresh temp file beside `path` and rename it over
/// `path`. Concurrent callers each get their own temp file; the last rename
/// wins.
fn replace_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    // Created with mode 0600 on unix
    let mut tmp = tempfile::Builder::new()
        .prefix(".tokgate-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
