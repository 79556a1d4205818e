use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::clock::{Clock, SystemClock};
use super::token::{TokenHandle, TokenInfo, TokenState};
use crate::api::{ApiClient, ApiRequest, RequestTransport};
use crate::config::{mask, Credentials};
use crate::error::{AuthError, Error, Result, TokenOperation};

pub const ISSUE_API_ID: &str = "au10001";
pub const ISSUE_PATH: &str = "/oauth2/token";
pub const REVOKE_API_ID: &str = "au10002";
pub const REVOKE_PATH: &str = "/oauth2/revoke";
pub const GRANT_TYPE: &str = "client_credentials";

/// Owns the access token for one set of credentials.
///
/// The manager is the only writer of its [`TokenState`]. Its internal client
/// and every client handed out by [`TokenManager::client`] read the same
/// state, so they can never present a token the manager no longer holds.
pub struct TokenManager {
    credentials: Credentials,
    state: TokenHandle,
    client: ApiClient,
    clock: Arc<dyn Clock>,
    lifecycle: Mutex<()>,
    span: Option<Span>,
}

impl TokenManager {
    pub fn new(credentials: Credentials, transport: Arc<dyn RequestTransport>) -> Self {
        let state = TokenHandle::new();
        let client = ApiClient::new(&credentials.base_url, transport, state.clone());

        Self {
            credentials,
            state,
            client,
            clock: Arc::new(SystemClock),
            lifecycle: Mutex::new(()),
            span: None,
        }
    }

    /// Use `clock` for expiry checks instead of local wall-clock time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Log under `span` instead of the caller's current span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// A client presenting whatever token this manager holds at call time.
    pub fn client(&self) -> ApiClient {
        self.client.clone()
    }

    pub fn token_handle(&self) -> TokenHandle {
        self.state.clone()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn scope(&self) -> Span {
        self.span.clone().unwrap_or_else(Span::current)
    }

    /// Requests a fresh token and replaces the held one with it.
    ///
    /// # Errors
    /// [`AuthError::Rejected`] when the gateway refuses the credentials,
    /// [`AuthError::MissingToken`] when it accepts them but returns no token,
    /// and any transport failure as is. The held token is unchanged on error.
    pub async fn issue_token(&self) -> Result<TokenState> {
        let _guard = self.lifecycle.lock().await;
        self.issue_locked().await
    }

    async fn issue_locked(&self) -> Result<TokenState> {
        let span = info_span!(parent: &self.scope(), "issue_token", base_url = %self.credentials.base_url);

        async {
            let body = json!({
                "grant_type": GRANT_TYPE,
                "appkey": self.credentials.appkey,
                "secretkey": self.credentials.secretkey,
            });
            let request = ApiRequest::post(ISSUE_API_ID, ISSUE_PATH, body).use_token(false);

            let envelope = self
                .client
                .execute(&request)
                .await
                .map_err(|err| rejected(err, TokenOperation::Issue))?;

            let issued = TokenState::issued(
                envelope.str_field("token"),
                envelope.str_field("token_type"),
                expiry_text(envelope.field("expires_dt")),
            );
            if issued.is_empty() {
                warn!("issuance response carried no token");
                return Err(AuthError::MissingToken.into());
            }

            self.state.replace(issued.clone());
            info!(
                token = %mask(issued.token()),
                token_type = issued.token_type(),
                expires_dt = issued.expires_dt(),
                "token issued"
            );
            Ok(issued)
        }
        .instrument(span)
        .await
    }

    /// Revokes `token`, or the held token when `token` is `None`.
    ///
    /// Returns `Ok(false)` without touching the network when there is nothing
    /// to revoke. The held token is cleared only if it is the one revoked.
    pub async fn revoke_token(&self, token: Option<&str>) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;

        let current = self.state.token();
        let target = token.filter(|value| !value.is_empty()).unwrap_or(current.as_str()).to_string();
        if target.is_empty() {
            debug!(parent: &self.scope(), "no token to revoke");
            return Ok(false);
        }

        let span = info_span!(parent: &self.scope(), "revoke_token", token = %mask(&target));
        async {
            // Authorize with the target token, not the held one.
            let mut client = self.client.clone();
            client.update_token(target.as_str());

            let body = json!({
                "appkey": self.credentials.appkey,
                "secretkey": self.credentials.secretkey,
                "token": &target,
            });
            let request = ApiRequest::post(REVOKE_API_ID, REVOKE_PATH, body);

            client
                .execute(&request)
                .await
                .map_err(|err| rejected(err, TokenOperation::Revoke))?;

            if target == self.state.token() {
                self.state.clear();
                info!("held token revoked and cleared");
            } else {
                info!("token revoked; held token kept");
            }
            Ok(true)
        }
        .instrument(span)
        .await
    }

    /// Whether the held token can be presented right now.
    pub fn is_token_valid(&self) -> bool {
        self.scope().in_scope(|| self.state.snapshot().is_valid_at(self.clock.now()))
    }

    /// Returns a valid token, issuing one first if needed.
    ///
    /// The validity check and the issuance run under one lock, so concurrent
    /// callers that all find the token expired cause a single issuance.
    pub async fn ensure_token(&self) -> Result<String> {
        let _guard = self.lifecycle.lock().await;

        if self.is_token_valid() {
            debug!(parent: &self.scope(), "held token is still valid");
            return Ok(self.state.token());
        }

        info!(parent: &self.scope(), "held token missing or expired; issuing a new one");
        let issued = self.issue_locked().await?;
        Ok(issued.token().to_string())
    }

    pub fn get_token(&self) -> String {
        self.state.token()
    }

    pub fn get_token_info(&self) -> TokenInfo {
        let state = self.state.snapshot();
        let is_valid = self.scope().in_scope(|| state.is_valid_at(self.clock.now()));

        TokenInfo {
            token: state.token().to_string(),
            token_type: state.token_type().to_string(),
            expires_dt: state.expires_dt().map(str::to_string),
            is_valid,
        }
    }

    /// Installs a previously saved token, replacing the held one.
    pub async fn load_token(&self, state: TokenState) {
        let _guard = self.lifecycle.lock().await;
        debug!(parent: &self.scope(), token = %mask(state.token()), "loading saved token");
        self.state.replace(state);
    }
}

/// `expires_dt` as text. A number keeps its digits; any other present
/// value keeps its JSON text so that it fails to parse as an expiry.
fn expiry_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn rejected(err: Error, operation: TokenOperation) -> Error {
    match err {
        Error::Api(source) => AuthError::Rejected { operation, source }.into(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::{HttpTransport, TransportResponse};
    use crate::auth::FixedClock;
    use crate::error::TransportError;
    use crate::testing::RecordingTransport;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    fn credentials(base_url: &str) -> Credentials {
        Credentials::new("app-key", "secret-key", base_url).unwrap()
    }

    fn manager(server: &MockServer) -> TokenManager {
        TokenManager::new(credentials(&server.uri()), Arc::new(HttpTransport::new().unwrap()))
    }

    fn issued_body(token: &str, expires_dt: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "return_code": 0,
            "return_msg": "issued",
            "token": token,
            "token_type": "bearer",
            "expires_dt": expires_dt,
        }))
    }

    fn envelope(body: Value) -> TransportResponse {
        TransportResponse { status: 200, continuation: Default::default(), body }
    }

    #[tokio::test]
    async fn issue_sends_credentials_without_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .and(header("api-id", ISSUE_API_ID))
            .and(body_json(json!({
                "grant_type": "client_credentials",
                "appkey": "app-key",
                "secretkey": "secret-key",
            })))
            .respond_with(issued_body("T", "20991231235959"))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server);
        let state = manager.issue_token().await.unwrap();

        assert_eq!(state, TokenState::issued("T", "bearer", Some("20991231235959".into())));
        assert_eq!(manager.token_handle().snapshot(), state);
        assert_eq!(manager.client().token(), "T");

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn rejected_issue_leaves_state_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "return_code": 5, "return_msg": "bad key" })),
            )
            .mount(&server)
            .await;

        let manager = manager(&server);
        let err = manager.issue_token().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Auth(AuthError::Rejected { operation: TokenOperation::Issue, ref source })
                if source.code == 5 && source.message == "bad key"
        ));
        assert_eq!(err.return_code(), Some(5));
        assert_eq!(manager.token_handle().snapshot(), TokenState::empty());
        assert_eq!(manager.client().token(), "");
    }

    #[tokio::test]
    async fn numeric_expiry_is_still_checked() {
        let issued = |token: &str, expires_dt: Value| {
            envelope(json!({ "return_code": 0, "token": token, "expires_dt": expires_dt }))
        };
        let transport = RecordingTransport::new()
            .respond(issued("T", json!(20200101000000_i64)))
            .respond(issued("U", json!(20991231235959_i64)))
            .respond(issued("V", json!(true)));
        let manager = TokenManager::new(credentials("http://gateway.test"), Arc::new(transport))
            .with_clock(Arc::new(FixedClock::new(noon())));

        let state = manager.issue_token().await.unwrap();
        assert_eq!(state.expires_dt(), Some("20200101000000"));
        assert!(!manager.is_token_valid());

        assert_eq!(manager.ensure_token().await.unwrap(), "U");
        assert!(manager.is_token_valid());

        let state = manager.issue_token().await.unwrap();
        assert_eq!(state.expires_dt(), Some("true"));
        assert!(!manager.get_token_info().is_valid);
    }

    #[test]
    fn null_expiry_counts_as_absent() {
        assert_eq!(expiry_text(None), None);
        assert_eq!(expiry_text(Some(&Value::Null)), None);
        assert_eq!(expiry_text(Some(&json!("20991231235959"))).as_deref(), Some("20991231235959"));
    }

    #[tokio::test]
    async fn failed_reissue_keeps_previous_token() {
        let transport = RecordingTransport::new().fail(TransportError::Timeout {
            url: "http://gateway.test/oauth2/token".into(),
            timeout: crate::api::DEFAULT_TIMEOUT,
        });
        let manager = TokenManager::new(credentials("http://gateway.test"), Arc::new(transport));
        let previous = TokenState::issued("old", "bearer", Some("20240101000000".into()));
        manager.load_token(previous.clone()).await;

        let err = manager.issue_token().await.unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Timeout { .. })));
        assert_eq!(manager.token_handle().snapshot(), previous);
    }

    #[tokio::test]
    async fn success_without_token_is_an_error() {
        let transport = RecordingTransport::new()
            .respond(envelope(json!({ "return_code": 0, "return_msg": "ok" })));
        let manager = TokenManager::new(credentials("http://gateway.test"), Arc::new(transport));

        let err = manager.issue_token().await.unwrap_err();

        assert!(matches!(err, Error::Auth(AuthError::MissingToken)));
        assert!(manager.get_token().is_empty());
    }

    #[tokio::test]
    async fn revoke_without_any_token_makes_no_call() {
        let transport = Arc::new(RecordingTransport::new());
        let manager = TokenManager::new(credentials("http://gateway.test"), transport.clone());

        assert!(!manager.revoke_token(None).await.unwrap());
        assert!(!manager.revoke_token(Some("")).await.unwrap());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn revoking_held_token_clears_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REVOKE_PATH))
            .and(header("api-id", REVOKE_API_ID))
            .and(header("authorization", "Bearer T"))
            .and(body_json(json!({ "appkey": "app-key", "secretkey": "secret-key", "token": "T" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "return_code": 0 })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server);
        manager.load_token(TokenState::issued("T", "bearer", None)).await;

        assert!(manager.revoke_token(None).await.unwrap());
        assert_eq!(manager.token_handle().snapshot(), TokenState::empty());
        assert_eq!(manager.client().token(), "");
    }

    #[tokio::test]
    async fn revoking_another_token_keeps_the_held_one() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REVOKE_PATH))
            .and(header("authorization", "Bearer other-token"))
            .and(body_json(json!({
                "appkey": "app-key",
                "secretkey": "secret-key",
                "token": "other-token",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "return_code": 0 })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server);
        manager.load_token(TokenState::issued("T", "bearer", None)).await;

        assert!(manager.revoke_token(Some("other-token")).await.unwrap());
        assert_eq!(manager.get_token(), "T");
        assert_eq!(manager.client().token(), "T");
    }

    #[tokio::test]
    async fn rejected_revoke_keeps_state() {
        let transport = RecordingTransport::new()
            .respond(envelope(json!({ "return_code": 8005, "return_msg": "token not found" })));
        let manager = TokenManager::new(credentials("http://gateway.test"), Arc::new(transport));
        manager.load_token(TokenState::issued("T", "bearer", None)).await;

        let err = manager.revoke_token(None).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Auth(AuthError::Rejected { operation: TokenOperation::Revoke, .. })
        ));
        assert_eq!(manager.get_token(), "T");
    }

    #[tokio::test]
    async fn validity_follows_the_clock() {
        let clock = FixedClock::new(noon());
        let manager = TokenManager::new(
            credentials("http://gateway.test"),
            Arc::new(RecordingTransport::new()),
        )
        .with_clock(Arc::new(clock.clone()));

        assert!(!manager.is_token_valid());

        manager.load_token(TokenState::issued("T", "bearer", None)).await;
        assert!(manager.is_token_valid());

        let expiry = noon() + TimeDelta::seconds(1);
        let expires_dt = expiry.format(crate::auth::EXPIRY_FORMAT).to_string();
        manager.load_token(TokenState::issued("T", "bearer", Some(expires_dt))).await;
        assert!(manager.is_token_valid());

        clock.advance(TimeDelta::seconds(1));
        assert!(!manager.is_token_valid());

        clock.advance(TimeDelta::seconds(1));
        let info = manager.get_token_info();
        assert_eq!(info.token, "T");
        assert!(!info.is_valid);
    }

    #[tokio::test]
    async fn token_info_is_recomputed_each_call() {
        let clock = FixedClock::new(noon());
        let manager = TokenManager::new(
            credentials("http://gateway.test"),
            Arc::new(RecordingTransport::new()),
        )
        .with_clock(Arc::new(clock.clone()));
        manager
            .load_token(TokenState::issued("T", "bearer", Some("20240315120100".into())))
            .await;

        assert!(manager.get_token_info().is_valid);
        clock.advance(TimeDelta::minutes(2));
        assert_eq!(
            manager.get_token_info(),
            TokenInfo {
                token: "T".into(),
                token_type: "bearer".into(),
                expires_dt: Some("20240315120100".into()),
                is_valid: false,
            }
        );
    }

    #[tokio::test]
    async fn ensure_token_issues_once_then_reuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .respond_with(issued_body("T", "20991231235959"))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server);
        assert_eq!(manager.ensure_token().await.unwrap(), "T");
        assert_eq!(manager.ensure_token().await.unwrap(), "T");
    }

    #[tokio::test]
    async fn ensure_token_reissues_expired_token() {
        let transport = Arc::new(
            RecordingTransport::new().respond(envelope(json!({
                "return_code": 0,
                "token": "fresh",
                "token_type": "bearer",
                "expires_dt": "20991231235959",
            }))),
        );
        let manager = TokenManager::new(credentials("http://gateway.test"), transport.clone())
            .with_clock(Arc::new(FixedClock::new(noon())));
        manager
            .load_token(TokenState::issued("stale", "bearer", Some("20240315115959".into())))
            .await;

        assert_eq!(manager.ensure_token().await.unwrap(), "fresh");
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.requests()[0].header("authorization"), None);
    }

    #[tokio::test]
    async fn concurrent_ensure_token_issues_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ISSUE_PATH))
            .respond_with(issued_body("T", "20991231235959").set_delay(std::time::Duration::from_millis(100)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server);
        let (first, second, third) =
            tokio::join!(manager.ensure_token(), manager.ensure_token(), manager.ensure_token());

        assert_eq!(first.unwrap(), "T");
        assert_eq!(second.unwrap(), "T");
        assert_eq!(third.unwrap(), "T");
    }

    #[tokio::test]
    async fn ensure_token_propagates_transport_failure() {
        let transport = RecordingTransport::new().fail(TransportError::Connect {
            url: "http://gateway.test/oauth2/token".into(),
            message: "connection refused".into(),
        });
        let manager = TokenManager::new(credentials("http://gateway.test"), Arc::new(transport));

        let err = manager.ensure_token().await.unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Connect { .. })));
        assert!(manager.get_token().is_empty());
    }

    #[tokio::test]
    async fn handed_out_clients_follow_reissues() {
        let transport = RecordingTransport::new()
            .respond(envelope(json!({ "return_code": 0, "token": "first" })))
            .respond(envelope(json!({ "return_code": 0, "token": "second" })));
        let manager = TokenManager::new(credentials("http://gateway.test"), Arc::new(transport));
        let api = manager.client();

        manager.issue_token().await.unwrap();
        assert_eq!(api.token(), "first");

        manager.issue_token().await.unwrap();
        assert_eq!(api.token(), "second");
    }
}
