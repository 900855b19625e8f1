//! CSRF binding between the authorization redirect and its callback.
//!
//! The state token travels twice: in the `state` query parameter the
//! provider echoes back, and in an `HttpOnly` cookie scoped to the callback
//! path. Nothing is stored server-side; the callback is accepted only when
//! both copies are present and byte-identical.

use std::collections::HashMap;
use subtle::ConstantTimeEq;
use thiserror::Error;


/// CSRF validation failures.
///
/// The variants exist for logs only. Clients always see the same
/// "invalid state" answer so the endpoint cannot be used as an oracle.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CsrfError {
    #[error("invalid state: state cookie not present")]
    MissingCookie,
    #[error("invalid state: state parameter not present")]
    MissingState,
    #[error("invalid state: cookie and parameter differ")]
    Mismatch,
}

impl CsrfError {
    /// Short label for structured log fields
    pub fn reason(&self) -> &'static str {
        match self {
            CsrfError::MissingCookie => "missing_cookie",
            CsrfError::MissingState => "missing_state",
            CsrfError::Mismatch => "mismatch",
        }
    }
}

/// Encodes the state into a `Set-Cookie` value and validates it on return.
#[derive(Clone, Debug)]
pub struct CsrfStateBinder {
    cookie_name: String,
    path: String,
    max_age_seconds: u64,
}

impl CsrfStateBinder {
    /// # Arguments
    /// * `cookie_name` - Name of the state cookie (e.g. `csrfState`)
    /// * `path` - Callback path the cookie is scoped to
    /// * `max_age_seconds` - Authentication window, in seconds
    pub fn new(cookie_name: impl Into<String>, path: impl Into<String>, max_age_seconds: u64) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            path: path.into(),
            max_age_seconds,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// `Set-Cookie` value carrying `state` for the authentication window.
    pub fn bind(&self, state: &str) -> String {
        self.cookie(state, self.max_age_seconds)
    }

    /// `Set-Cookie` value expiring the state cookie immediately.
    ///
    /// Pure function of the binder, so replaying it is always safe.
    pub fn clear(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: u64) -> String {
        format!(
            "{}={}; Max-Age={}; Path={}; HttpOnly; Secure; SameSite=Lax",
            self.cookie_name, value, max_age, self.path
        )
    }

    /// Check the state cookie in `cookie_header` against `returned_state`.
    ///
    /// Empty values count as absent.
    pub fn validate(
        &self,
        cookie_header: Option<&str>,
        returned_state: Option<&str>,
    ) -> Result<(), CsrfError> {
        let cookies = cookie_header.map(parse_cookie_header).unwrap_or_default();

        let expected = cookies
            .get(self.cookie_name.as_str())
            .filter(|value| !value.is_empty())
            .ok_or(CsrfError::MissingCookie)?;

        let returned = returned_state
            .filter(|value| !value.is_empty())
            .ok_or(CsrfError::MissingState)?;

        if constant_time_equal(expected.as_bytes(), returned.as_bytes()) {
            Ok(())
        } else {
            Err(CsrfError::Mismatch)
        }
    }

    pub fn is_valid(&self, cookie_header: Option<&str>, returned_state: Option<&str>) -> bool {
        self.validate(cookie_header, returned_state).is_ok()
    }

    /// Recover the state carried by a `Set-Cookie` value produced by [`bind`](Self::bind).
    pub fn state_from_set_cookie(&self, set_cookie: &str) -> Option<String> {
        let (name, value) = set_cookie.split(';').next()?.split_once('=')?;
        if name.trim() != self.cookie_name {
            return None;
        }
        Some(value.trim().to_string())
    }
}

/// Parse a raw `Cookie` header into a map of name → value.
///
/// Pairs are separated by `;`, names and values may carry surrounding
/// whitespace, values may be double-quoted. Pairs without `=` are skipped.
/// When a name repeats, the first occurrence wins (browsers send the most
/// specific path first).
pub fn parse_cookie_header(header: &str) -> HashMap<&str, &str> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        cookies.entry(name).or_insert(value);
    }
    cookies
}

fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
