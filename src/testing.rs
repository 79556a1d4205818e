//! Scripted transport for unit tests that don't need a socket.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::{RequestTransport, TransportRequest, TransportResponse};
use crate::error::TransportError;

/// Replays queued outcomes in order and records every request it sees.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    outcomes: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(self, response: TransportResponse) -> Self {
        self.outcomes.lock().push_back(Ok(response));
        self
    }

    pub(crate) fn fail(self, error: TransportError) -> Self {
        self.outcomes.lock().push_back(Err(error));
        self
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl RequestTransport for RecordingTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = request.url.clone();
        self.requests.lock().push(request);

        self.outcomes.lock().pop_front().unwrap_or_else(|| {
            Err(TransportError::Network { url, message: "no scripted response left".into() })
        })
    }
}
