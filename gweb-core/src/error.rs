//! # Errors
//!
//! Two families of errors cross the public API:
//!
//! - **[`ProtocolError`]**: the peer violated the gRPC or gRPC-Web wire format. Framing and
//!   base64 failures share this type, callers cannot tell them apart.
//! - **[`CallError`]**: the outcome of a call-level operation. Either the RPC failed with a
//!   [`tonic::Status`], or the API was misused (reading the status of an unfinished call,
//!   writing to a completed request stream, etc.).
//!
//! Stream adapters implement `AsyncRead`, so protocol errors travel through them
//! as `std::io::Error` of kind `InvalidData` and are recovered with [`ProtocolError::from_io`].
use std::io;
use tonic::metadata::errors::{InvalidMetadataKey, InvalidMetadataValue};

/// A violation of the gRPC message framing or of the gRPC-Web transcoding.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Truncated frame header: stream ended after {read} of 5 bytes")]
    TruncatedHeader { read: usize },

    #[error("Truncated frame: expected {expected} payload bytes, stream ended after {read}")]
    TruncatedFrame { expected: usize, read: usize },

    #[error("Unexpected data after the trailer frame")]
    DataAfterTrailers,

    #[error("Malformed trailer line '{0}': missing ':' separator")]
    MalformedTrailer(String),

    #[error("Invalid trailer name '{0}'")]
    InvalidTrailerName(String),

    #[error("Invalid value for trailer '{0}'")]
    InvalidTrailerValue(String),

    #[error("Malformed base64 content: {0}")]
    MalformedBase64(String),

    #[error("Base64 stream ended in the middle of a quantum ({0} dangling characters)")]
    TruncatedBase64(usize),

    #[error("Received a compressed message but no 'grpc-encoding' was negotiated")]
    MissingEncoding,

    #[error("Unsupported message encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("Failed to decompress message: {0}")]
    Decompress(#[source] io::Error),

    #[error("Message of {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("The stream is unusable after an earlier protocol error")]
    StreamFailed,

    #[error("Transport error while reading the body: {0}")]
    Transport(#[source] io::Error),
}

impl ProtocolError {
    /// Extracts a protocol error travelling inside an [`io::Error`], wrapping any other
    /// I/O failure as [`ProtocolError::Transport`].
    pub fn from_io(err: io::Error) -> Self {
        match err.downcast::<ProtocolError>() {
            Ok(protocol) => protocol,
            Err(err) => ProtocolError::Transport(err),
        }
    }

    /// Maps the error onto the gRPC status surfaced to the caller.
    pub fn to_status(&self) -> tonic::Status {
        match self {
            ProtocolError::MessageTooLarge { .. } => tonic::Status::resource_exhausted(self.to_string()),
            ProtocolError::UnsupportedEncoding(_) => tonic::Status::unimplemented(self.to_string()),
            ProtocolError::Transport(_) => tonic::Status::unavailable(self.to_string()),
            _ => tonic::Status::internal(self.to_string()),
        }
    }
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Transport(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<ProtocolError> for tonic::Status {
    fn from(err: ProtocolError) -> Self {
        err.to_status()
    }
}

/// Errors returned by the call lifecycle API.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("gRPC call failed: {0}")]
    Status(#[from] tonic::Status),

    #[error("The call has not completed yet, status and trailers are not available")]
    NotComplete,

    #[error("The call has been disposed")]
    Disposed,

    #[error("The request stream has already been completed")]
    RequestStreamCompleted,

    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },

    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

impl CallError {
    /// Returns the gRPC status if this error represents a failed RPC.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            CallError::Status(status) => Some(status),
            _ => None,
        }
    }
}

impl From<ProtocolError> for CallError {
    fn from(err: ProtocolError) -> Self {
        CallError::Status(err.to_status())
    }
}
