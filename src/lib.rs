//! Token lifecycle and request plumbing for the Kiwoom REST gateway.
//!
//! [`TokenManager`] issues, validates and revokes the bearer token;
//! [`ApiClient`] sends operation-tagged requests that present it. Both read
//! one shared token state, so a client never lags behind its manager.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiRequest, Continuation, HttpTransport, Pager, ResponseEnvelope};
pub use auth::{TokenHandle, TokenInfo, TokenManager, TokenState, TokenStorage};
pub use config::{Credentials, Mode, Settings};
pub use error::{ApiError, AuthError, Error, Result, TransportError};
