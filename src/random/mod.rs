//! Cryptographically secure randomness for CSRF state tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

/// Number of random bytes in a state token (256 bits).
pub const STATE_TOKEN_BYTES: usize = 32;

/// Source of unpredictable bytes.
///
/// Injected into [`crate::authorize::AuthorizationRequestBuilder`] so tests
/// can pin the generated state while production always reads the OS CSPRNG.
pub trait SecureRandomSource: Send + Sync {
    /// Fill `dest` entirely with random bytes.
    fn fill(&self, dest: &mut [u8]);
}

/// Operating system CSPRNG (`getrandom` under the hood).
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

impl SecureRandomSource for OsRandom {
    fn fill(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Mint a fresh state token: 32 random bytes, base64url without padding.
///
/// The alphabet is `[A-Za-z0-9-_]`, so the token never needs
/// percent-encoding in a query string or a cookie value.
pub fn generate_state_token(source: &dyn SecureRandomSource) -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    source.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
