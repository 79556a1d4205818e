mod client;
mod envelope;
mod pagination;
mod transport;

pub use client::{ApiClient, ApiRequest, CONTENT_TYPE, OPERATION_ID_HEADER};
pub use envelope::{ResponseEnvelope, MISSING_RETURN_CODE};
pub use pagination::{Continuation, Pager};
pub use transport::{
    HttpTransport, HttpTransportBuilder, Method, Payload, RequestTransport, TransportRequest,
    TransportResponse, CONT_YN_HEADER, DEFAULT_TIMEOUT, NEXT_KEY_HEADER,
};
