use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, debug_span, error, Instrument, Span};
use uuid::Uuid;

use super::envelope::ResponseEnvelope;
use super::pagination::{Continuation, Pager};
use super::transport::{
    Method, Payload, RequestTransport, TransportRequest, CONT_YN_HEADER, DEFAULT_TIMEOUT,
    NEXT_KEY_HEADER,
};
use crate::auth::TokenHandle;
use crate::error::Result;

/// Header naming the remote operation, e.g. `au10001`.
pub const OPERATION_ID_HEADER: &str = "api-id";
pub const CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Everything needed to issue one gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub operation_id: String,
    pub method: Method,
    pub path: String,
    /// JSON body for POST, query parameters for GET.
    pub params: Value,
    pub use_token: bool,
    pub continuation: Continuation,
}

impl ApiRequest {
    pub fn post(operation_id: impl Into<String>, path: impl Into<String>, body: Value) -> Self {
        Self::new(operation_id.into(), Method::Post, path.into(), body)
    }

    pub fn get(operation_id: impl Into<String>, path: impl Into<String>, query: Value) -> Self {
        Self::new(operation_id.into(), Method::Get, path.into(), query)
    }

    fn new(operation_id: String, method: Method, path: String, params: Value) -> Self {
        Self {
            operation_id,
            method,
            path,
            params,
            use_token: true,
            continuation: Continuation::none(),
        }
    }

    pub fn use_token(mut self, use_token: bool) -> Self {
        self.use_token = use_token;
        self
    }

    pub fn continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = continuation;
        self
    }
}

/// Authenticated client for the gateway.
///
/// The client does not own a token. It reads whatever its [`TokenHandle`]
/// currently holds, so a client obtained from
/// [`TokenManager::client`](crate::TokenManager::client) always presents the
/// manager's current token.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn RequestTransport>,
    token: TokenHandle,
    span: Option<Span>,
}

impl ApiClient {
    pub fn new(base_url: &str, transport: Arc<dyn RequestTransport>, token: TokenHandle) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            token,
            span: None,
        }
    }

    /// Log inside `span` instead of the caller's current span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The token this client would present right now.
    pub fn token(&self) -> String {
        self.token.token()
    }

    /// Presents `token` from now on.
    ///
    /// Only this client is affected. A client obtained from a token manager
    /// stops following the manager's token after this call.
    pub fn update_token(&mut self, token: impl Into<String>) {
        self.token = TokenHandle::detached(token);
        debug!("client token replaced");
    }

    pub async fn post(
        &self,
        operation_id: &str,
        path: &str,
        body: Value,
        use_token: bool,
        continuation: Continuation,
    ) -> Result<ResponseEnvelope> {
        let request = ApiRequest::post(operation_id, path, body)
            .use_token(use_token)
            .continuation(continuation);
        self.execute(&request).await
    }

    pub async fn get(
        &self,
        operation_id: &str,
        path: &str,
        query: Value,
        use_token: bool,
        continuation: Continuation,
    ) -> Result<ResponseEnvelope> {
        let request = ApiRequest::get(operation_id, path, query)
            .use_token(use_token)
            .continuation(continuation);
        self.execute(&request).await
    }

    /// Sends `request` and checks the envelope's `return_code`.
    ///
    /// # Errors
    /// [`Error::Transport`](crate::Error::Transport) when the HTTP exchange
    /// fails, [`Error::Api`](crate::Error::Api) when the gateway answers with
    /// a non-zero `return_code`.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ResponseEnvelope> {
        let url = format!("{}{}", self.base_url, request.path);
        let span = self.call_span(&request.operation_id);

        async move {
            let payload = match request.method {
                Method::Post => Payload::Json(request.params.clone()),
                Method::Get => Payload::Query(query_pairs(&request.params)),
            };
            let transport_request = TransportRequest {
                method: request.method,
                url,
                headers: self.build_headers(
                    &request.operation_id,
                    request.use_token,
                    &request.continuation,
                ),
                payload,
                timeout: DEFAULT_TIMEOUT,
            };
            debug!(url = %transport_request.url, method = ?request.method, "sending request");

            let response = self
                .transport
                .execute(transport_request)
                .await
                .inspect_err(|err| error!(error = %err, "request failed"))?;

            let envelope = ResponseEnvelope::from_body(response.body, response.continuation);
            debug!(return_code = envelope.return_code(), "received envelope");

            let envelope = envelope.into_result().inspect_err(|err| {
                error!(return_code = err.code, return_msg = %err.message, "gateway returned an error");
            })?;
            Ok(envelope)
        }
        .instrument(span)
        .await
    }

    /// A [`Pager`] over every page of `request`.
    pub fn pager(&self, request: ApiRequest) -> Pager {
        Pager::new(self.clone(), request)
    }

    fn call_span(&self, api_id: &str) -> Span {
        let request_id = Uuid::new_v4();
        match &self.span {
            Some(parent) => debug_span!(parent: parent, "api_call", api_id, %request_id),
            None => debug_span!("api_call", api_id, %request_id),
        }
    }

    fn build_headers(
        &self,
        operation_id: &str,
        use_token: bool,
        continuation: &Continuation,
    ) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (OPERATION_ID_HEADER, operation_id.to_string()),
            ("content-type", CONTENT_TYPE.to_string()),
        ];

        if let Some(bearer) = use_token.then(|| self.token.bearer()).flatten() {
            headers.push(("authorization", bearer));
        }
        if !continuation.cont_yn.is_empty() {
            headers.push((CONT_YN_HEADER, continuation.cont_yn.clone()));
        }
        if !continuation.next_key.is_empty() {
            headers.push((NEXT_KEY_HEADER, continuation.next_key.clone()));
        }

        headers
    }
}

fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        return Vec::new();
    };

    map.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}
