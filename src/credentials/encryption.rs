//! AES-256-GCM sealing of individual tokens.
//!
//! Each token is sealed under its own random 96-bit nonce. Ciphertext and
//! nonce are stored base64-encoded next to each other.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// A sealed token: `(ciphertext, nonce)`, both base64.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// Master-key holder. The key lives in memory only.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}

impl TokenCipher {
    /// Build from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_base64.trim())
            .context("encryption key is not valid base64")?;
        Self::from_bytes(&key)
    }

    pub fn from_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            bail!(
                "encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key.len()
            );
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("invalid key: {}", e))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &str) -> Result<Sealed> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encryption failed: {}", e))?;

        Ok(Sealed {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Fails on a wrong key, a wrong nonce or any tampering.
    pub fn open(&self, sealed: &Sealed) -> Result<String> {
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .context("ciphertext is not valid base64")?;
        let nonce = BASE64
            .decode(&sealed.nonce)
            .context("nonce is not valid base64")?;
        if nonce.len() != NONCE_SIZE {
            bail!("nonce must be {} bytes, got {}", NONCE_SIZE, nonce.len());
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| anyhow!("decryption failed (wrong key or corrupted data)"))?;

        String::from_utf8(plaintext).context("decrypted token is not valid UTF-8")
    }
}
