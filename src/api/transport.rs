use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::debug;

use super::pagination::Continuation;
use crate::error::TransportError;

/// Every gateway call is bounded by this.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const CONT_YN_HEADER: &str = "cont-yn";
pub const NEXT_KEY_HEADER: &str = "next-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// What goes out alongside the headers.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(Value),
    Query(Vec<(String, String)>),
}

/// One fully-assembled HTTP call.
#[derive(Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub payload: Payload,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The bearer token stays out of debug output.
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case("authorization") {
                    (*name, "Bearer ***")
                } else {
                    (*name, value.as_str())
                }
            })
            .collect();

        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("payload", &self.payload)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A 2xx response whose body decoded as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Continuation values the gateway put in the response headers.
    pub continuation: Continuation,
    pub body: Value,
}

/// Executes single HTTP calls. Holds no per-call state.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest)
        -> Result<TransportResponse, TransportError>;
}

/// [`RequestTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let TransportRequest { method, url, headers, payload, timeout } = request;

        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .timeout(timeout);

        for (name, value) in &headers {
            builder = builder.header(*name, value);
        }

        // Headers go on first so `json` keeps our charset-qualified content type.
        builder = match payload {
            Payload::Empty => builder,
            Payload::Json(body) => builder.json(&body),
            Payload::Query(pairs) => builder.query(&pairs),
        };

        let response = builder
            .send()
            .await
            .map_err(|err| classify(&url, timeout, err))?;

        let status = response.status();
        let continuation = continuation_from_headers(response.headers());
        debug!(%url, status = status.as_u16(), "received HTTP response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { url, status: status.as_u16(), body });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| classify(&url, timeout, err))?;
        let body = serde_json::from_slice(&bytes).map_err(|err| TransportError::Decode {
            url: url.clone(),
            message: err.to_string(),
        })?;

        Ok(TransportResponse { status: status.as_u16(), continuation, body })
    }
}

fn classify(url: &str, timeout: Duration, err: reqwest::Error) -> TransportError {
    // A connect that runs out the clock reports both; the timeout wins.
    if err.is_timeout() {
        TransportError::Timeout { url: url.to_string(), timeout }
    } else if err.is_connect() {
        TransportError::Connect { url: url.to_string(), message: err.to_string() }
    } else {
        TransportError::Network { url: url.to_string(), message: err.to_string() }
    }
}

fn continuation_from_headers(headers: &HeaderMap) -> Continuation {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    Continuation { cont_yn: read(CONT_YN_HEADER), next_key: read(NEXT_KEY_HEADER) }
}

/// Builder for [`HttpTransport`].
#[derive(Debug)]
pub struct HttpTransportBuilder {
    user_agent: String,
    connect_timeout: Duration,
    system_proxy: bool,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
            system_proxy: false,
        }
    }
}

impl HttpTransportBuilder {
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` from the environment. Off by default.
    pub fn system_proxy(mut self, enabled: bool) -> Self {
        self.system_proxy = enabled;
        self
    }

    pub fn build(self) -> Result<HttpTransport, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .connect_timeout(self.connect_timeout);
        if !self.system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Client(err.to_string()))?;

        Ok(HttpTransport { client })
    }
}
