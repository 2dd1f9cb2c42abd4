//! Error types for the xDS client.

use thiserror::Error;

/// Error type for the xDS client.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to establish a connection or open the ADS stream.
    #[error("connection error: {0}")]
    Connection(String),

    /// The ADS stream terminated with an RPC status.
    #[error("stream error: {0}")]
    Stream(tonic::Status),

    /// The ADS stream is closed; no further requests can be sent.
    #[error("ADS stream closed")]
    StreamClosed,

    /// Failed to decode a wire message.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A resource failed validation.  The message is echoed back to the
    /// management server in the NACK's error detail.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested resource was not present in the server's response.
    #[error("resource does not exist: {0}")]
    DoesNotExist(String),

    /// The caller violated an API precondition.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The bootstrap configuration is missing or malformed.
    #[error("bootstrap error: {0}")]
    Bootstrap(String),
}

impl Error {
    /// Produces an owned copy suitable for fanning one failure out to
    /// multiple watchers.  Variants holding non-cloneable payloads are
    /// flattened to their display form.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Connection(msg) => Error::Connection(msg.clone()),
            Error::StreamClosed => Error::StreamClosed,
            Error::Validation(msg) => Error::Validation(msg.clone()),
            Error::DoesNotExist(name) => Error::DoesNotExist(name.clone()),
            Error::InvalidOperation(msg) => Error::InvalidOperation(msg.clone()),
            Error::Bootstrap(msg) => Error::Bootstrap(msg.clone()),
            other => Error::Connection(other.to_string()),
        }
    }
}

/// Result type alias for xDS client operations.
pub type Result<T> = std::result::Result<T, Error>;
