//! Client error types.

use hublink_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timed out")]
    Timeout,

    /// The hub answered a request with an error reply.
    #[error("hub error: {0}")]
    Hub(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no hub device found")]
    NoHubFound,

    #[error("{0} hub devices found, specify a port path")]
    MultipleHubsFound(usize),
}
