use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::config::mask;

/// Layout of `expires_dt`: `YYYYMMDDHHMMSS`.
pub const EXPIRY_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expiry {value:?} is not a YYYYMMDDHHMMSS timestamp")]
pub struct ExpiryParseError {
    pub value: String,
}

/// The bearer token currently held, if any.
///
/// An empty token never carries a type or an expiry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredToken")]
pub struct TokenState {
    token: String,
    token_type: String,
    expires_dt: Option<String>,
}

impl TokenState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A token as the issuance endpoint returned it.
    ///
    /// An empty `token` yields [`TokenState::empty`]; a blank `expires_dt`
    /// counts as absent.
    pub fn issued(
        token: impl Into<String>,
        token_type: impl Into<String>,
        expires_dt: Option<String>,
    ) -> Self {
        let token = token.into();
        if token.is_empty() {
            return Self::empty();
        }

        Self {
            token,
            token_type: token_type.into(),
            expires_dt: expires_dt
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_dt(&self) -> Option<&str> {
        self.expires_dt.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }

    /// Parsed expiry; `Ok(None)` when the token never expires.
    pub fn expires_at(&self) -> Result<Option<NaiveDateTime>, ExpiryParseError> {
        self.expires_dt.as_deref().map(parse_expiry).transpose()
    }

    /// Whether the token may still be presented at `now`.
    ///
    /// A token without an expiry is treated as never expiring. The comparison
    /// is strict and has no skew margin: at the expiry instant the token is
    /// already invalid. An unparseable expiry makes the token invalid.
    pub fn is_valid_at(&self, now: NaiveDateTime) -> bool {
        if self.token.is_empty() {
            return false;
        }

        match self.expires_at() {
            Ok(None) => true,
            Ok(Some(expiry)) => {
                let valid = now < expiry;
                if !valid {
                    warn!(expires_dt = self.expires_dt.as_deref(), "token has expired");
                }
                valid
            }
            Err(err) => {
                error!(error = %err, "could not parse token expiry");
                false
            }
        }
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("token", &mask(&self.token))
            .field("token_type", &self.token_type)
            .field("expires_dt", &self.expires_dt)
            .finish()
    }
}

/// Wire shape used when reading a persisted token back.
#[derive(Deserialize)]
struct StoredToken {
    #[serde(default)]
    token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_dt: Option<String>,
}

impl From<StoredToken> for TokenState {
    fn from(stored: StoredToken) -> Self {
        Self::issued(stored.token, stored.token_type, stored.expires_dt)
    }
}

fn parse_expiry(value: &str) -> Result<NaiveDateTime, ExpiryParseError> {
    let invalid = || ExpiryParseError { value: value.to_string() };
    if value.len() != 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    // All ASCII digits, so every slice below is on a char boundary and parses.
    let field = |range: std::ops::Range<usize>| value[range].parse::<u32>().map_err(|_| invalid());
    let year = i32::try_from(field(0..4)?).map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)
        .and_then(|date| date.and_hms_opt(field(8..10).ok()?, field(10..12).ok()?, field(12..14).ok()?))
        .ok_or_else(invalid)
}

/// Shared, readable view of a [`TokenState`].
///
/// Anyone holding a handle can read the token; only the crate can change
/// it, which leaves [`crate::TokenManager`] as the single writer.
#[derive(Debug, Clone, Default)]
pub struct TokenHandle {
    state: Arc<RwLock<TokenState>>,
}

impl TokenHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is not shared with any manager.
    pub fn detached(token: impl Into<String>) -> Self {
        Self { state: Arc::new(RwLock::new(TokenState::issued(token, "", None))) }
    }

    pub fn snapshot(&self) -> TokenState {
        self.state.read().clone()
    }

    pub fn token(&self) -> String {
        self.state.read().token.clone()
    }

    /// `Authorization` header value, or `None` while no token is held.
    pub fn bearer(&self) -> Option<String> {
        let state = self.state.read();
        (!state.token.is_empty()).then(|| format!("Bearer {}", state.token))
    }

    pub fn shares_state_with(&self, other: &TokenHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub(crate) fn replace(&self, state: TokenState) {
        *self.state.write() = state;
    }

    pub(crate) fn clear(&self) {
        *self.state.write() = TokenState::empty();
    }
}

/// Snapshot returned by [`crate::TokenManager::get_token_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub token: String,
    pub token_type: String,
    pub expires_dt: Option<String>,
    pub is_valid: bool,
}
