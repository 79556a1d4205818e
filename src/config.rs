//! Gateway credentials and process settings.
//!
//! Two credential sets live side by side in the environment (or a `.env`
//! file): one for the real trading gateway and one for the mock gateway.
//! `MODE` picks which one is used.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::ConfigError;

/// Base URL of the real trading gateway.
pub const REAL_BASE_URL: &str = "https://api.kiwoom.com";
/// Base URL of the mock trading gateway.
pub const VIRTUAL_BASE_URL: &str = "https://mockapi.kiwoom.com";

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Real,
    #[default]
    Virtual,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Virtual => "virtual",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Real => REAL_BASE_URL,
            Self::Virtual => VIRTUAL_BASE_URL,
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            Self::Real => "REAL",
            Self::Virtual => "VIRTUAL",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "real" => Ok(Self::Real),
            "virtual" => Ok(Self::Virtual),
            _ => Err(ConfigError::InvalidMode(value.to_string())),
        }
    }
}

/// The app key pair and the gateway it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub appkey: String,
    pub secretkey: String,
    /// Always stored without a trailing slash.
    pub base_url: String,
}

impl Credentials {
    pub fn new(
        appkey: impl Into<String>,
        secretkey: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url).map_err(|err| ConfigError::InvalidBaseUrl {
            url: base_url.clone(),
            message: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                message: format!("unsupported scheme {:?}", parsed.scheme()),
                url: base_url,
            });
        }

        Ok(Self {
            appkey: appkey.into(),
            secretkey: secretkey.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

// Secrets must never reach the logs in full.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("appkey", &mask(&self.appkey))
            .field("secretkey", &"***")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Shows the first eight characters of a secret-ish value.
pub(crate) fn mask(value: &str) -> String {
    if value.is_empty() {
        return "(unset)".to_string();
    }
    let prefix: String = value.chars().take(8).collect();
    format!("{prefix}...")
}

/// Everything the binary needs at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub credentials: Credentials,
    /// A previously issued token, if one was configured.
    pub token: Option<String>,
    pub log_level: String,
}

impl Settings {
    /// Loads `.env` (if present) and reads settings from the environment.
    ///
    /// # Errors
    /// Fails if `MODE` is unrecognised, the selected mode has no app key or
    /// secret key, or its base URL does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is fine; real environment variables still apply.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mode = match var("MODE") {
            Some(raw) => raw.parse()?,
            None => Mode::default(),
        };
        let prefix = mode.env_prefix();

        let (Some(appkey), Some(secretkey)) =
            (var(&format!("{prefix}_APPKEY")), var(&format!("{prefix}_SECRETKEY")))
        else {
            return Err(ConfigError::MissingCredentials { mode });
        };
        let base_url = var(&format!("{prefix}_API_URL"))
            .unwrap_or_else(|| mode.default_base_url().to_string());

        Ok(Self {
            mode,
            credentials: Credentials::new(appkey, secretkey, base_url)?,
            token: var(&format!("{prefix}_TOKEN")),
            log_level: var("LOG_LEVEL")
                .map(|level| level.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}
