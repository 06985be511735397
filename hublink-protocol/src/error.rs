//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing or decoding wire messages.
///
/// Every variant is scoped to a single line or payload; none of them is
/// fatal to a connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid base64 in {0}")]
    InvalidBase64(&'static str),

    #[error("message matches no known key shape")]
    Unclassifiable,

    #[error("malformed {0} payload")]
    MalformedPayload(&'static str),
}
