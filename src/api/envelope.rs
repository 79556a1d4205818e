use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::pagination::Continuation;
use crate::error::ApiError;

/// Code used when a response omits `return_code` or sends a non-integer.
pub const MISSING_RETURN_CODE: i64 = -1;

/// A decoded gateway response.
///
/// `return_code == 0` is the only success value, whatever the HTTP status
/// was. The full body is kept, status fields included.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    return_code: i64,
    return_msg: String,
    payload: Map<String, Value>,
    header_continuation: Continuation,
}

impl ResponseEnvelope {
    pub fn from_body(body: Value, header_continuation: Continuation) -> Self {
        let payload = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let return_code = payload
            .get("return_code")
            .and_then(Value::as_i64)
            .unwrap_or(MISSING_RETURN_CODE);
        let return_msg = payload
            .get("return_msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self { return_code, return_msg, payload, header_continuation }
    }

    pub fn return_code(&self) -> i64 {
        self.return_code
    }

    pub fn return_msg(&self) -> &str {
        &self.return_msg
    }

    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }

    /// `Ok(self)` on success, the gateway's code and message otherwise.
    pub fn into_result(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::new(self.return_code, self.return_msg))
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// String field, or `""` when absent or not a string.
    pub fn str_field(&self, name: &str) -> &str {
        self.field(name).and_then(Value::as_str).unwrap_or_default()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Cursor for the next page, if the gateway reported one.
    ///
    /// Body fields take precedence; the response headers are consulted only
    /// when the body carries neither `cont_yn` nor `next_key`.
    pub fn continuation(&self) -> Option<Continuation> {
        let body = Continuation {
            cont_yn: self.str_field("cont_yn").trim().to_string(),
            next_key: self.str_field("next_key").trim().to_string(),
        };
        let source = if body.is_empty() { &self.header_continuation } else { &body };

        source.has_more().then(|| Continuation::next(source.next_key.clone()))
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }
}
