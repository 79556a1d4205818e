//! Failure kinds surfaced by the token and request layers.
//!
//! Nothing in this crate retries. Every error travels to the immediate
//! caller, which decides what to do with it.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::Mode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any failure produced by [`crate::ApiClient`] or [`crate::TokenManager`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("token storage error: {0}")]
    Storage(#[from] StorageError),
}

impl Error {
    /// The gateway's `return_code`, if this failure came from one.
    pub fn return_code(&self) -> Option<i64> {
        match self {
            Self::Api(err) => Some(err.code),
            Self::Auth(AuthError::Rejected { source, .. }) => Some(source.code),
            _ => None,
        }
    }
}

/// Startup problems, raised before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("appkey and secretkey must both be set for {mode} mode")]
    MissingCredentials { mode: Mode },

    #[error("unknown mode {0:?} (expected \"real\" or \"virtual\")")]
    InvalidMode(String),

    #[error("invalid base URL {url:?}: {message}")]
    InvalidBaseUrl { url: String, message: String },
}

/// A single HTTP exchange failed before a JSON envelope could be read.
///
/// Each cause keeps its own variant; a timeout is never reported as a
/// connection failure or vice versa.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16, body: String },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },

    #[error("could not build HTTP client: {0}")]
    Client(String),
}

/// Business-level failure: the envelope carried a non-zero `return_code`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

impl ApiError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Which token endpoint an [`AuthError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOperation {
    Issue,
    Revoke,
}

impl fmt::Display for TokenOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue => f.write_str("issuance"),
            Self::Revoke => f.write_str("revocation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token {operation} rejected: {source}")]
    Rejected {
        operation: TokenOperation,
        #[source]
        source: ApiError,
    },

    #[error("token issuance succeeded but the response carried no token")]
    MissingToken,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keyring access failed: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("stored token is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}
